use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::cmd::config::{
    Action, Config, CycleAction, CycleOp, Export as ExportCfg, Run as RunCfg,
    Upload as UploadCfg,
};
use acflux_core::datatype::DataType;
use acflux_core::gastype::GasType;
use acflux_core::instruments::{Instrument, InstrumentType};

fn parse_datetime_str(s: &str) -> Result<DateTime<Utc>, String> {
    parse_datetime(s).ok_or_else(|| format!("Could not parse datetime: {s}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "acflux",
    about = "Chamber flux calculation from trace gas analyzer data",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Path to SQLite database
    #[arg(long = "db", value_name = "PATH", default_value = "acflux.db", global = true)]
    pub db_path: String,

    /// More logging, repeat for more
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the database tables
    Init,

    /// Register or list analyzers
    Instrument {
        #[command(subcommand)]
        cmd: InstrumentCmd,
    },

    /// Upload data files (no processing here)
    Upload {
        #[command(subcommand)]
        kind: UploadKind,
    },

    /// Calculate fluxes for every stored cycle in the range
    Run(RunArgs),

    /// Write calculated fluxes as csv
    Export(ExportArgs),

    /// Inspect or adjust a single calculated cycle
    Cycle {
        #[command(subcommand)]
        cmd: CycleCmd,
    },
}

/* --------------------- instrument --------------------- */

#[derive(Debug, Subcommand)]
pub enum InstrumentCmd {
    /// Add an analyzer, an existing serial gets its model replaced
    Add {
        #[arg(long = "serial")]
        serial: String,
        /// e.g. LI-7810, LI-7820
        #[arg(long = "model")]
        model: InstrumentType,
    },
    /// List registered analyzers
    List,
}

/* ----------------------- upload ----------------------- */

#[derive(Debug, Subcommand)]
pub enum UploadKind {
    /// Upload cycle data files
    Cycle(UploadArgs),

    /// Upload gas data files
    Gas(UploadArgs),

    /// Upload height data files
    Height(UploadArgs),

    /// Upload meteo data files
    Meteo(UploadArgs),
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Glob path to files to upload (quote the pattern)
    #[arg(num_args = 1..,
        value_hint = ValueHint::AnyPath,
        required = true,
        short = 'i', long = "inputs",
        value_name = "Input files")]
    pub inputs: Vec<String>,

    /// Timezone of naive timestamps, UTC if not given
    #[arg(short = 'z', long = "tz")]
    pub tz: Option<Tz>,

    /// Analyzer serial, required for gas files
    #[arg(long = "serial")]
    pub serial: Option<String>,

    /// Registers the serial with this model before uploading gas files
    #[arg(long = "model")]
    pub model: Option<InstrumentType>,

    /// Source name for meteo rows without a source column
    #[arg(long = "source")]
    pub source: Option<String>,
}

/* ------------------------- run ------------------------- */

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Start datetime, defaults to the newest calculated cycle
    #[arg(short = 's', long = "start", value_parser = parse_datetime_str, value_name = "START")]
    pub start: Option<DateTime<Utc>>,

    /// End datetime, defaults to now
    #[arg(short = 'e', long = "end", value_parser = parse_datetime_str, value_name = "END")]
    pub end: Option<DateTime<Utc>>,

    /// Only calculate for this analyzer
    #[arg(long = "serial")]
    pub serial: Option<String>,

    /// Meteo source to use, nearest of any source if not given
    #[arg(long = "meteo-source")]
    pub meteo_source: Option<String>,

    /// Flag cycles whose candidate window r values spread too much
    #[arg(long = "check-r-spread")]
    pub check_r_spread: bool,
}

/* ------------------------ export ----------------------- */

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[arg(short = 's', long = "start", value_parser = parse_datetime_str, value_name = "START")]
    pub start: DateTime<Utc>,

    #[arg(short = 'e', long = "end", value_parser = parse_datetime_str, value_name = "END")]
    pub end: DateTime<Utc>,

    /// Chamber ids to include, all if not given
    #[arg(long = "chamber", num_args = 1..)]
    pub chambers: Vec<String>,

    #[arg(long = "valid")]
    pub valid: Option<bool>,

    #[arg(long = "serial")]
    pub serial: Option<String>,

    /// Output file, stdout if not given
    #[arg(short = 'o', long = "output", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

/* ------------------------ cycle ------------------------ */

#[derive(Debug, Args)]
pub struct CycleArgs {
    /// Start time of the cycle
    #[arg(long = "start", value_parser = parse_datetime_str)]
    pub start: DateTime<Utc>,

    #[arg(long = "serial")]
    pub serial: String,

    #[arg(long = "chamber")]
    pub chamber: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum CycleCmd {
    /// Print the stored row
    Show(CycleArgs),
    /// Set the lag manually and recalculate
    Lag {
        #[command(flatten)]
        cycle: CycleArgs,
        #[arg(long = "lag", allow_hyphen_values = true)]
        lag: i64,
    },
    /// Drop the lag and search it again
    ResetLag(CycleArgs),
    /// Recalculate everything, including meteo and chamber height lookups
    Recalc(CycleArgs),
    /// Mark the cycle valid or invalid, or hand validity back to the checks with --clear
    Validity {
        #[command(flatten)]
        cycle: CycleArgs,
        #[arg(long = "valid", action = ArgAction::Set, required_unless_present = "clear")]
        valid: Option<bool>,
        #[arg(long = "clear", conflicts_with = "valid")]
        clear: bool,
    },
    /// Set the regression window of one gas, offsets in seconds from the cycle start
    Window {
        #[command(flatten)]
        cycle: CycleArgs,
        #[arg(long = "gas")]
        gas: GasType,
        #[arg(long = "from")]
        from: i64,
        #[arg(long = "to")]
        to: i64,
    },
    /// Move the end of the cycle
    NudgeEnd {
        #[command(flatten)]
        cycle: CycleArgs,
        #[arg(long = "delta", allow_hyphen_values = true)]
        delta: i64,
    },
}

// -------- Map CLI -> Config/Action types --------

impl Cli {
    pub fn into_config(self) -> Config {
        let db_path = PathBuf::from(self.db_path);

        let action = match self.command {
            Commands::Init => Action::Init,

            Commands::Instrument { cmd } => match cmd {
                InstrumentCmd::Add { serial, model } => {
                    Action::InstrumentAdd(Instrument::new(model, serial))
                },
                InstrumentCmd::List => Action::InstrumentList,
            },

            Commands::Upload { kind } => {
                let (file_type, u) = match kind {
                    UploadKind::Gas(u) => (DataType::Gas, u),
                    UploadKind::Height(u) => (DataType::Height, u),
                    UploadKind::Meteo(u) => (DataType::Meteo, u),
                    UploadKind::Cycle(u) => (DataType::Cycle, u),
                };
                Action::Upload(UploadCfg {
                    file_type,
                    inputs: u.inputs,
                    tz: u.tz,
                    serial: u.serial,
                    model: u.model,
                    source: u.source,
                })
            },

            Commands::Run(run) => Action::Run(RunCfg {
                start: run.start,
                end: run.end,
                serial: run.serial,
                meteo_source: run.meteo_source,
                check_r_spread: run.check_r_spread,
            }),

            Commands::Export(ex) => Action::Export(ExportCfg {
                start: ex.start,
                end: ex.end,
                chambers: ex.chambers,
                valid: ex.valid,
                serial: ex.serial,
                output: ex.output,
            }),

            Commands::Cycle { cmd } => {
                let (args, op) = match cmd {
                    CycleCmd::Show(c) => (c, CycleOp::Show),
                    CycleCmd::Lag { cycle, lag } => (cycle, CycleOp::Lag(lag)),
                    CycleCmd::ResetLag(c) => (c, CycleOp::ResetLag),
                    CycleCmd::Recalc(c) => (c, CycleOp::Recalc),
                    CycleCmd::Validity { cycle, valid, clear } => {
                        (cycle, CycleOp::Validity(if clear { None } else { valid }))
                    },
                    CycleCmd::Window { cycle, gas, from, to } => {
                        (cycle, CycleOp::Window { gas, start: from, end: to })
                    },
                    CycleCmd::NudgeEnd { cycle, delta } => (cycle, CycleOp::NudgeEnd(delta)),
                };
                Action::Cycle(CycleAction {
                    start: args.start,
                    serial: args.serial,
                    chamber: args.chamber,
                    op,
                })
            },
        };

        Config { db_path, action, progress_receiver: None }
    }
}

/// RFC 3339, or a naive datetime or date taken as UTC.
fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    for fmt in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let naive_date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&naive_date.and_hms_opt(0, 0, 0)?))
}
