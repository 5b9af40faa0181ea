use crate::infra::DemoCreditGateway;
use clap::Args;
use risk_lens::config::ServiceConfig;
use risk_lens::error::AppError;
use risk_lens::workflows::application::{
    ApplicationSession, ApplicationWorkflow, Channel, DecisionResult, Gender, HistoryBrowser,
    StatementUpload,
};
use risk_lens::workflows::explanation::{Explanation, ExplanationRenderer};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_STATEMENT: &str = "Date,Narration,Amount,Type\n\
2025-01-01,SALARY ACME LTD,85000,CR\n\
2025-01-09,RENT JANUARY,22000,DR\n\
2025-02-01,SALARY ACME LTD,85000,CR\n";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Applicant name used for the sample application
    #[arg(long, default_value = "Asha Rao")]
    pub(crate) full_name: String,
    /// Requested loan amount in rupees
    #[arg(long, default_value_t = 150_000.0)]
    pub(crate) loan_amount: f64,
    /// Applicant age in years
    #[arg(long, default_value_t = 29)]
    pub(crate) age: u32,
    /// Years with the current employer
    #[arg(long, default_value_t = 4)]
    pub(crate) years_employed: u32,
    /// Simulated bureau score
    #[arg(long, default_value_t = 780)]
    pub(crate) bureau_score: u32,
    /// Simulated bureau latency in milliseconds
    #[arg(long, default_value_t = 300)]
    pub(crate) bureau_delay_ms: u64,
    /// Skip both enrichment channels and submit the manual values only
    #[arg(long)]
    pub(crate) skip_enrichment: bool,
    /// Manual income used when enrichment is skipped
    #[arg(long, default_value_t = 20_000.0)]
    pub(crate) income: f64,
    /// Manual credit score used when enrichment is skipped
    #[arg(long, default_value_t = 712)]
    pub(crate) credit_score: u32,
}

#[derive(Args, Debug)]
pub(crate) struct ExplainArgs {
    /// Decision payload as returned by the scoring service
    #[arg(long)]
    pub(crate) decision: PathBuf,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let services = ServiceConfig {
        bureau_delay: Duration::from_millis(args.bureau_delay_ms),
        bureau_score: args.bureau_score,
        ..ServiceConfig::default()
    };
    let gateway = Arc::new(DemoCreditGateway::default());
    let workflow = ApplicationWorkflow::new(Arc::clone(&gateway), &services);
    let mut session = ApplicationSession::new();

    println!("Credit application demo");
    for (field, raw) in [
        ("full_name", args.full_name.clone()),
        ("loan_amount", args.loan_amount.to_string()),
        ("age", args.age.to_string()),
        ("years_employed", args.years_employed.to_string()),
        ("gender", Gender::Female.code().to_string()),
        ("income", args.income.to_string()),
        ("credit_score", args.credit_score.to_string()),
    ] {
        workflow.edit(&mut session, field, &raw)?;
    }

    if args.skip_enrichment {
        println!("- Enrichment skipped; submitting manual values");
    } else {
        let bureau = workflow.start_bureau(&mut session);
        let statement = workflow.start_statement(
            &mut session,
            StatementUpload::csv("demo-statement.csv", SAMPLE_STATEMENT.as_bytes().to_vec()),
        );
        let (bureau, statement) = tokio::join!(bureau, statement);
        for completion in [statement, bureau] {
            workflow.finish_enrichment(&mut session, completion);
        }

        for channel in [Channel::Bureau, Channel::Statement] {
            if let Some(notification) = session.channel(channel).notification() {
                println!("- {}: {}", notification.title, notification.description);
            }
        }
    }

    let values = session.form().values();
    println!(
        "- Submitting {} | income {:.0} | loan {:.0} | credit score {}",
        values.full_name, values.income, values.loan_amount, values.credit_score
    );

    workflow.submit(&mut session).await?;
    let Some(submitted) = session.decision() else {
        let reason = session
            .last_submit_error()
            .map(ToString::to_string)
            .unwrap_or_else(|| "no response".to_string());
        println!("  Submission failed: {reason}");
        return Ok(());
    };
    print_decision(&submitted.decision, submitted.explanation.as_ref());

    let mut history = HistoryBrowser::new(
        Arc::clone(&gateway),
        *workflow.renderer(),
        services.request_timeout,
    );
    history.refresh().await;
    match history.select(0) {
        Ok(replayed) => {
            let matches = replayed.explanation == submitted.explanation;
            println!(
                "\nHistory: {} record(s); replay of latest matches live view: {}",
                history.records().len(),
                if matches { "yes" } else { "no" }
            );
        }
        Err(err) => println!("\nHistory unavailable: {err}"),
    }

    Ok(())
}

pub(crate) fn run_explain(args: ExplainArgs) -> Result<(), AppError> {
    let raw = std::fs::read_to_string(&args.decision)?;
    let payload: Value = serde_json::from_str(&raw)?;
    let decoded = DecisionResult::from_wire(payload)?;

    for skip in &decoded.skipped {
        println!("! skipped factor #{}: {}", skip.index, skip.reason);
    }

    let decision = &decoded.decision;
    let explanation =
        ExplanationRenderer::default().render(&decision.factors, &decision.applicant);
    print_decision(decision, explanation.as_ref());
    Ok(())
}

fn print_decision(decision: &DecisionResult, explanation: Option<&Explanation>) {
    let banner = if decision.is_approved() {
        "APPROVED"
    } else {
        "NOT APPROVED"
    };
    println!("\n{banner} ({})", decision.verdict.label());
    println!("{}", decision.headline());

    match explanation {
        Some(explanation) => {
            if let Some(chart) = explanation.chart() {
                println!("Contributing factors:");
                for bar in chart {
                    println!(
                        "  {:<20} {:<10} {:+.3}",
                        bar.feature,
                        "#".repeat((bar.length / 10.0).ceil() as usize),
                        bar.magnitude
                    );
                }
            }
            println!("{}", explanation.to_text());
        }
        None => println!("No explanation available."),
    }
}
