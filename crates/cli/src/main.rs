use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use intake_core::store::{CounterKey, DocumentStore, SqliteStore, UsageCounter};
use intake_core::{
    GenerateReportRequest, IntakeService, OpenAiClient, ReportConfig, ReportService,
};
use intake_types::{Caller, NonEmptyText};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "intake")]
#[command(about = "Clinic intake and AI report CLI")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "INTAKE_DB_PATH", default_value = intake_core::constants::DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a uid to the admin allowlist
    GrantAdmin {
        uid: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Submit an intake form from a JSON file
    Submit {
        /// Path to the submission JSON
        file: PathBuf,
        /// Uid recorded as the submitter
        #[arg(long)]
        uid: String,
    },
    /// Show an admin's usage counter for a day
    Usage {
        admin_uid: String,
        /// Day in YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Show an intake's usage counter for a day
    IntakeUsage {
        intake_id: String,
        /// Day in YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        day: Option<NaiveDate>,
    },
    /// Generate a report for an intake
    Generate {
        intake_id: String,
        /// clinician_summary, treatment_plan, followup_questions or both
        report_type: String,
        /// Admin uid to generate as
        #[arg(long)]
        uid: String,
        #[arg(long)]
        email: Option<String>,
        /// `patient` for patient mode
        #[arg(long)]
        mode: Option<String>,
    },
    /// List reports stored for an intake
    Reports {
        intake_id: String,
        #[arg(long)]
        uid: String,
    },
}

fn caller(uid: &str, email: Option<String>) -> Result<Caller, Box<dyn std::error::Error>> {
    Ok(Caller::new(NonEmptyText::new(uid)?, email))
}

fn print_counter(label: &str, day: NaiveDate, counter: &UsageCounter) {
    println!(
        "{label} on {day}: success {}, pending {}, est. cost ${:.6}",
        counter.count_success, counter.count_pending, counter.est_cost_usd
    );
    if let Some(at) = counter.last_call_at {
        println!("Last call at: {}", at.to_rfc3339());
    }
}

fn report_service(store: Arc<SqliteStore>) -> Result<ReportService, Box<dyn std::error::Error>> {
    let config = ReportConfig::from_lookup(|k| std::env::var(k).ok())?;
    let model = OpenAiClient::new(
        config.model_endpoint.clone(),
        std::env::var("OPENAI_API_KEY").ok(),
        config.model_timeout,
    )?;
    Ok(ReportService::new(store, Arc::new(model), config)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'intake --help' for commands");
        return Ok(());
    };

    let store = Arc::new(SqliteStore::open(&cli.db)?);
    let today = Utc::now().date_naive();

    match command {
        Commands::GrantAdmin { uid, email } => match store.grant_admin(&uid, email.as_deref()) {
            Ok(()) => {
                println!("Granted admin access to: {}", uid);
                if let Some(email) = store.admin_email(&uid)? {
                    println!("Email: {}", email);
                }
            }
            Err(e) => eprintln!("Error granting admin: {}", e),
        },
        Commands::Submit { file, uid } => {
            let data: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let service = IntakeService::new(store);
            match service.submit(Some(&caller(&uid, None)?), &data) {
                Ok(id) => println!("Submitted intake with ID: {}", id),
                Err(e) => eprintln!("Error submitting intake: {}", e.public_message()),
            }
        }
        Commands::Usage { admin_uid, day } => {
            let day = day.unwrap_or(today);
            let counter = store.read_counter(&CounterKey::admin(admin_uid.as_str(), day))?;
            print_counter(&format!("Admin {admin_uid}"), day, &counter);
        }
        Commands::IntakeUsage { intake_id, day } => {
            let day = day.unwrap_or(today);
            let counter = store.read_counter(&CounterKey::intake(intake_id.as_str(), day))?;
            print_counter(&format!("Intake {intake_id}"), day, &counter);
        }
        Commands::Generate {
            intake_id,
            report_type,
            uid,
            email,
            mode,
        } => {
            let service = report_service(store)?;
            let request = GenerateReportRequest {
                intake_id: Some(intake_id),
                report_type: Some(report_type),
                mode,
            };
            match service.generate(Some(&caller(&uid, email)?), &request).await {
                Ok(report) => {
                    println!("Report {} ({})", report.report_id, report.model);
                    println!();
                    println!("{}", report.content);
                }
                Err(e) => eprintln!("Error generating report [{}]: {}", e.code(), e.public_message()),
            }
        }
        Commands::Reports { intake_id, uid } => {
            let service = report_service(store)?;
            match service.list_reports(Some(&caller(&uid, None)?), &intake_id) {
                Ok(reports) if reports.is_empty() => println!("No reports found."),
                Ok(reports) => {
                    for report in reports {
                        let doc = report.document;
                        println!(
                            "ID: {}, Type: {}, Mode: {}, Created: {}, Est. cost: ${:.6}",
                            report.id,
                            doc.report_type,
                            doc.mode,
                            doc.created_at.to_rfc3339(),
                            doc.est_cost_usd
                        );
                    }
                }
                Err(e) => eprintln!("Error listing reports: {}", e.public_message()),
            }
        }
    }

    Ok(())
}
