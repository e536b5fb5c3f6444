use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facemark_core::gallery::{self, DEFAULT_MIN_EMBEDDING_QUALITY};
use facemark_core::{Face, Tuning};
use facemark_store::{FaceStore, PersonUpdate};
use std::path::{Path, PathBuf};

mod commands;

use commands::EnrollRequest;

#[derive(Parser)]
#[command(name = "facemark", about = "facemark landmark-based face recognition CLI")]
struct Cli {
    /// Database path (defaults to $FACEMARK_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML file overriding extractor and matcher tuning
    #[arg(long, global = true)]
    tuning: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new person from a landmark file
    Enroll {
        #[arg(short, long)]
        name: String,
        /// JSON array of faces, each an array of {x, y} keypoints
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Enrollment photo; enables the photo quality check
        #[arg(short, long)]
        image: Option<PathBuf>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Replace the embedding of an enrolled person
    Reenroll {
        id: String,
        #[arg(short, long)]
        landmarks: PathBuf,
    },
    /// Edit a person's name or description
    Update {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Match every face in a landmark file against the gallery
    Match {
        #[arg(short, long)]
        landmarks: PathBuf,
        /// Base similarity threshold (0.0-1.0)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List enrolled persons
    List,
    /// Remove an enrolled person
    Remove {
        /// Person ID to remove
        id: String,
    },
    /// Show recent detection logs
    Logs {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
        /// Only logs attributed to this person ID
        #[arg(short, long)]
        person: Option<String>,
    },
    /// Show enrollment and detection totals
    Stats {
        /// Days of per-day detection counts
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Check stored embeddings for corruption and low quality
    Audit,
    /// Export the gallery as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a gallery JSON file
    Import { file: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let tuning = match &cli.tuning {
        Some(path) => Tuning::load(path)?,
        None => Tuning::default(),
    };
    let db_path = cli.db.clone().unwrap_or_else(facemark_store::default_db_path);
    let mut store = FaceStore::open(&db_path)?;
    tracing::debug!(path = %db_path.display(), "using database");

    match cli.command {
        Commands::Enroll { name, landmarks, image, description } => {
            let faces = read_landmarks(&landmarks)?;
            let photo_size = match &image {
                Some(image) => Some(
                    image::image_dimensions(image)
                        .with_context(|| format!("failed to read {}", image.display()))?,
                ),
                None => None,
            };
            let image_ref = image.as_deref().unwrap_or(landmarks.as_path()).display().to_string();

            let enrolled = commands::enroll(
                &store,
                &tuning,
                &faces,
                EnrollRequest { name, description, image_ref, photo_size },
            )
            .with_context(|| format!("enrollment from {} failed", landmarks.display()))?;

            if let Some(photo) = &enrolled.photo {
                for issue in &photo.issues {
                    println!("  warning: {issue}");
                }
                println!("Photo quality: {:.0}/100", photo.score);
            }
            if enrolled.low_quality() {
                println!("  warning: low embedding quality ({:.0}/100)", enrolled.embedding_quality);
            }
            println!("Enrolled {} as {}", enrolled.person.name, enrolled.person.id);
        }
        Commands::Reenroll { id, landmarks } => {
            let faces = read_landmarks(&landmarks)?;
            commands::reenroll(&store, &tuning, &id, &faces)?;
            println!("Re-enrolled {id}");
        }
        Commands::Update { id, name, description } => {
            if name.is_none() && description.is_none() {
                bail!("nothing to update, pass --name and/or --description");
            }
            if !store.update_person(&id, &PersonUpdate { name, description })? {
                bail!("no person with id {id}");
            }
            println!("Updated {id}");
        }
        Commands::Match { landmarks, threshold } => {
            let faces = read_landmarks(&landmarks)?;
            if faces.is_empty() {
                println!("No face detected");
                return Ok(());
            }

            let outcome = commands::match_faces(&store, &tuning, &faces, threshold)?;
            for row in &outcome.rejected {
                println!("  skipped {} ({}): {}", row.name, row.id, row.reason);
            }
            for (i, face) in outcome.faces.iter().enumerate() {
                match face {
                    Err(e) => println!("face {i}: unknown ({e})"),
                    Ok(report) => match &report.result {
                        Some(m) => println!(
                            "face {i}: {} ({}) similarity {:.1}%",
                            m.name, m.person_id, m.similarity
                        ),
                        None => println!(
                            "face {i}: unknown (best {:.1}%, threshold {:.0}%)",
                            report.best_similarity.unwrap_or(0.0),
                            report.threshold * 100.0
                        ),
                    },
                }
            }
        }
        Commands::List => {
            let persons = store.list()?;
            if persons.is_empty() {
                println!("No persons enrolled");
            }
            for p in persons {
                let dim = p.embedding.as_ref().map_or(0, |e| e.len());
                println!("{}  {}  dim={}  created={}", p.id, p.name, dim, p.created_at);
            }
        }
        Commands::Remove { id } => {
            if !store.remove(&id)? {
                bail!("no person with id {id}");
            }
            println!("Removed {id}");
        }
        Commands::Logs { limit, person } => {
            let logs = match &person {
                Some(id) => store.logs_by_person(id, limit)?,
                None => store.recent_logs(limit)?,
            };
            for log in logs {
                let who = log.person_name.as_deref().unwrap_or("unknown");
                let confidence = log.confidence.map(|c| format!("{c}%")).unwrap_or_else(|| "-".into());
                println!("{}  {}  {}  faces={}", log.created_at, who, confidence, log.face_count);
            }
        }
        Commands::Stats { days } => {
            let overview = store.overview()?;
            println!("Persons:        {}", overview.persons);
            println!("Detections:     {}", overview.detection_logs);
            println!("Today (UTC):    {}", overview.today_logs);
            for day in store.daily_log_counts(days)? {
                println!("  {}  {}", day.date, day.count);
            }
        }
        Commands::Audit => {
            let report = store.audit(DEFAULT_MIN_EMBEDDING_QUALITY)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export { output } => {
            let snapshot = store.gallery()?;
            let json = gallery::export_gallery(&snapshot.entries)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {} entries to {}", snapshot.entries.len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { file } => {
            let src = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entries = gallery::import_gallery(&src)?;
            let count = store.import(&entries, &file.display().to_string())?;
            println!("Imported {count} entries");
        }
    }

    Ok(())
}

fn read_landmarks(path: &Path) -> Result<Vec<Face>> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_landmarks(&src).with_context(|| format!("invalid landmark file {}", path.display()))
}

fn parse_landmarks(src: &str) -> Result<Vec<Face>> {
    Ok(serde_json::from_str(src)?)
}
