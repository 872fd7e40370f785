use crate::logs::PatientId;
use crate::store::StoreKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "adherence-engine",
    version,
    about = "Medication adherence baselines and anomaly detection"
)]
pub struct Cli {
    /// Overrides ADHERENCE_STORE.
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreKind>,
    /// Overrides ADHERENCE_DATA_DIR.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train (or retrain) a patient's baseline.
    Train(TrainArgs),
    /// Run anomaly detection over a patient's recent logs.
    Detect(DetectArgs),
    /// Show the stored baseline and the latest detection.
    History(PatientArgs),
    /// Change a patient's sensitivity level.
    Configure(ConfigureArgs),
    /// Run detection for every trained patient once.
    Batch,
    /// Run scheduled batch detection until interrupted.
    Run,
}

#[derive(Args, Debug)]
pub struct PatientArgs {
    #[arg(long)]
    pub patient: PatientId,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long)]
    pub patient: PatientId,
    /// JSON array of dose events; defaults to the logs directory.
    #[arg(long)]
    pub logs: Option<PathBuf>,
    #[arg(long)]
    pub sensitivity: Option<String>,
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    #[arg(long)]
    pub patient: PatientId,
    #[arg(long)]
    pub logs: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ConfigureArgs {
    #[arg(long)]
    pub patient: PatientId,
    #[arg(long)]
    pub sensitivity: String,
}
