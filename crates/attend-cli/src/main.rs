use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use attend_core::{AttendanceRow, AttendanceSummary, Gallery, Role};
use attend_store::{ReferenceData, Store};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod faces;
mod serve;

use config::Config;

#[derive(Parser)]
#[command(name = "attend", about = "Face-recognition class attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark attendance from the face embeddings of one photograph
    Mark {
        /// JSON file with the embeddings produced by the face encoder
        #[arg(short, long)]
        faces: PathBuf,
        /// Moment of the photograph (e.g. 2024-10-15T09:30:00); defaults to now in ATTEND_TZ
        #[arg(long)]
        at: Option<String>,
    },
    /// Process newline-delimited JSON requests from stdin
    Serve,
    /// Import groups, subjects, users, schedule and calendar from TOML
    Import {
        /// Reference data file
        path: PathBuf,
    },
    /// Register a new student
    Register {
        #[arg(long)]
        name: String,
        /// Institutional e-mail; its numeric local part is the enrollment number
        #[arg(long)]
        email: String,
        #[arg(long)]
        group: String,
    },
    /// Check a user's name and e-mail and show their role
    Whoami {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Attendance list for one of a professor's subjects
    Report {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Subject name; lists the professor's classes when omitted
        #[arg(long)]
        subject: Option<String>,
        /// First day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD), defaults to `from`
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Print JSON instead of a table
        #[arg(long, conflicts_with = "csv")]
        json: bool,
        /// Print CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Show the gallery snapshot
    Gallery,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Mark { faces, at } => {
            let now = match at {
                Some(raw) => parse_moment(&raw)?,
                None => config.now(),
            };
            let engine = engine::spawn_engine(&config)?;
            let verdict = engine.mark(faces::read_faces(&faces), now).await?;
            println!("{}", verdict.message());
            if verdict.is_error() {
                std::process::exit(2);
            }
        }
        Commands::Serve => {
            let engine = engine::spawn_engine(&config)?;
            tracing::info!(
                db = %config.db_path.display(),
                gallery = %config.gallery_path.display(),
                threshold = config.match_threshold,
                timezone = %config.timezone,
                "attend serve ready"
            );
            serve::run(engine, config.gallery_path.clone(), config.timezone).await?;
        }
        Commands::Import { path } => {
            let store = Store::open(&config.db_path)?;
            let data = ReferenceData::from_path(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let summary = data.apply(&store)?;
            println!(
                "imported {} groups, {} subjects, {} users, {} schedule slots, {} calendar days",
                summary.groups,
                summary.subjects,
                summary.users,
                summary.slots,
                summary.calendar_days
            );
        }
        Commands::Register { name, email, group } => {
            let store = Store::open(&config.db_path)?;
            let student = store.register_student(&name, &email, &group, &config.email_domain)?;
            if student.group_created {
                println!("created group {group} (id {})", student.group_id);
            }
            println!(
                "registered {name} as student {} with enrollment {}",
                student.user_id, student.enrollment
            );
        }
        Commands::Whoami { name, email } => {
            let store = Store::open(&config.db_path)?;
            match store.identity_by_credentials(&name, &email)? {
                Some(identity) => println!(
                    "{} (id {}) is a {}",
                    identity.name,
                    identity.id,
                    identity.role.as_str()
                ),
                None => bail!("no user named {name} with e-mail {email}"),
            }
        }
        Commands::Report {
            name,
            email,
            subject,
            from,
            to,
            json,
            csv,
        } => {
            let store = Store::open(&config.db_path)?;
            let professor = match store.identity_by_credentials(&name, &email)? {
                Some(identity) if identity.role == Role::Professor => identity,
                Some(_) => bail!("{name} is not a professor"),
                None => bail!("no user named {name} with e-mail {email}"),
            };
            let classes = store.classes_by_professor(professor.id)?;

            let Some(subject) = subject else {
                if classes.is_empty() {
                    println!("no classes assigned to {name}");
                }
                for class in &classes {
                    println!("{} - {}", class.subject_name, class.group_name);
                }
                return Ok(());
            };

            let Some(class) = classes.iter().find(|c| c.subject_name == subject) else {
                bail!("{name} does not teach {subject}");
            };

            let from = from.unwrap_or_else(|| config.now().date());
            let to = to.unwrap_or(from);
            let rows = store.attendance_between(class.subject_id, from, to)?;
            let summary = AttendanceSummary::from_rows(&rows);

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "subject": class.subject_name,
                        "from": from,
                        "to": to,
                        "rows": rows,
                        "summary": summary,
                    }))?
                );
            } else if csv {
                write_csv(&rows, std::io::stdout().lock())?;
            } else if rows.is_empty() {
                println!("no attendance recorded for {subject} between {from} and {to}");
            } else {
                println!("{:>6}  {:<30}  {:<10}  {:<8}  STATUS", "ID", "STUDENT", "DATE", "TIME");
                for row in &rows {
                    println!(
                        "{:>6}  {:<30}  {:<10}  {:<8}  {}",
                        row.record_id,
                        row.student_name,
                        row.date,
                        row.registered_at.format("%H:%M:%S"),
                        row.status.as_str()
                    );
                }
                println!(
                    "total {}, present {}, attendance {:.2}%",
                    summary.total, summary.present, summary.percent
                );
            }
        }
        Commands::Gallery => {
            let entries = attend_store::load_gallery(&config.gallery_path)?;
            let gallery = Gallery::new(entries)?;
            println!("entries:     {}", gallery.len());
            match gallery.dim() {
                Some(dim) => println!("dimensions:  {dim}"),
                None => println!("dimensions:  -"),
            }
            println!("fingerprint: {}", gallery.fingerprint());
            for (label, count) in gallery.label_counts() {
                println!("  {label}: {count}");
            }
        }
    }

    Ok(())
}

/// Attendance rows as CSV, header first even when there are no rows.
fn write_csv<W: std::io::Write>(rows: &[AttendanceRow], out: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["id", "student_id", "student", "date", "time", "status"])?;
    for row in rows {
        writer.write_record([
            row.record_id.to_string(),
            row.student_id.to_string(),
            row.student_name.clone(),
            row.date.to_string(),
            row.registered_at.format("%H:%M:%S").to_string(),
            row.status.as_str().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Accepts `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD HH:MM[:SS]`.
fn parse_moment(raw: &str) -> Result<NaiveDateTime> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(moment) = NaiveDateTime::parse_from_str(raw.trim(), format) {
            return Ok(moment);
        }
    }
    bail!("not a date and time: {raw:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moment() {
        let expected = NaiveDate::from_ymd_opt(2024, 10, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(parse_moment("2024-10-15T09:30:00").unwrap(), expected);
        assert_eq!(parse_moment("2024-10-15 09:30").unwrap(), expected);
        assert!(parse_moment("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_mark() {
        let cli = Cli::try_parse_from(["attend", "mark", "--faces", "f.json", "--at", "2024-10-15T09:30:00"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Mark { ref at, .. } if at.is_some()));
    }

    #[test]
    fn test_write_csv() {
        let rows = vec![AttendanceRow {
            record_id: 3,
            student_id: 12,
            student_name: "Gómez, Ana".into(),
            date: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            registered_at: chrono::NaiveTime::from_hms_opt(9, 30, 5).unwrap(),
            status: attend_core::AttendanceStatus::Present,
        }];
        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id,student_id,student,date,time,status\n3,12,\"Gómez, Ana\",2024-10-15,09:30:05,present\n"
        );
    }

    #[test]
    fn test_write_csv_header_only() {
        let mut out = Vec::new();
        write_csv(&[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id,student_id,student,date,time,status\n"
        );
    }

    #[test]
    fn test_report_formats_conflict() {
        let both = Cli::try_parse_from([
            "attend", "report", "--name", "Luis", "--email", "l@upy.edu.mx", "--json", "--csv",
        ]);
        assert!(both.is_err());
    }
}
