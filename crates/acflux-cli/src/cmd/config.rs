use acflux_core::cycle::{Cycle, CycleBuilder, CycleConfig, FluxRow};
use acflux_core::cycle_processor::{BatchSummary, Datasets, Infra, Processor};
use acflux_core::data_formats::fluxdata::write_flux_csv;
use acflux_core::data_formats::gasdata::{insert_measurements, read_gas_csv, GasData};
use acflux_core::data_formats::heightdata::{insert_height_data, read_height_csv};
use acflux_core::data_formats::meteodata::{insert_meteo_data, read_meteo_csv};
use acflux_core::data_formats::timedata::{insert_cycles, read_cycle_csv};
use acflux_core::datatype::DataType;
use acflux_core::db::open_db;
use acflux_core::error::{CycleError, IngestError, QueryError};
use acflux_core::gastype::GasType;
use acflux_core::instruments::{insert_instrument, Instrument, InstrumentRegistry, InstrumentType};
use acflux_core::processevent::{
    InsertEvent, ProcessEvent, ProcessEventSink, ProgressEvent, QueryEvent, ReadEvent,
};
use acflux_core::traits::{CycleDefinitionSource, PersistenceGateway};
use acflux_core::validation::ValidationConfig;

use chrono::{DateTime, Utc};
use chrono_tz::{Tz, UTC};
use glob::glob;
use rusqlite::Connection;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{
    error::TryRecvError, unbounded_channel, UnboundedReceiver, UnboundedSender,
};

/* =================== Public configuration types =================== */

#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub action: Action,
    pub progress_receiver: Option<UnboundedReceiver<ProcessEvent>>,
}

#[derive(Debug, Clone)]
pub enum Action {
    Init,
    InstrumentAdd(Instrument),
    InstrumentList,
    Upload(Upload),
    Run(Run),
    Export(Export),
    Cycle(CycleAction),
}

#[derive(Debug, Clone)]
pub struct Upload {
    pub file_type: DataType,
    pub inputs: Vec<String>,
    pub tz: Option<Tz>,
    pub serial: Option<String>,
    pub model: Option<InstrumentType>,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Run {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub serial: Option<String>,
    pub meteo_source: Option<String>,
    pub check_r_spread: bool,
}

#[derive(Debug, Clone)]
pub struct Export {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub chambers: Vec<String>,
    pub valid: Option<bool>,
    pub serial: Option<String>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CycleAction {
    pub start: DateTime<Utc>,
    pub serial: String,
    pub chamber: Option<String>,
    pub op: CycleOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOp {
    Show,
    Lag(i64),
    ResetLag,
    Recalc,
    /// `None` clears the override
    Validity(Option<bool>),
    Window { gas: GasType, start: i64, end: i64 },
    NudgeEnd(i64),
}

/// meteo rows without a source column and no --source
const DEFAULT_METEO_SOURCE: &str = "default";

/* =================== Error type (no process::exit) =================== */

#[derive(thiserror::Error, Debug)]
pub enum CmdError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Msg(String),
}

/* =================== Entry point =================== */

impl Config {
    pub fn run(&mut self) -> Result<(), CmdError> {
        match &self.action.clone() {
            Action::Init => self.run_init(),
            Action::InstrumentAdd(i) => self.run_instrument_add(i),
            Action::InstrumentList => self.run_instrument_list(),
            Action::Upload(u) => self.run_upload(u),
            Action::Run(r) => self.run_process(r).map(|_| ()),
            Action::Export(e) => self.run_export(e),
            Action::Cycle(c) => self.run_cycle(c),
        }
    }
}

/* =================== Actions =================== */

impl Config {
    fn run_init(&self) -> Result<(), CmdError> {
        open_db(&self.db_path)?;
        println!("Database ready at {}", self.db_path.display());
        Ok(())
    }

    fn run_instrument_add(&self, instrument: &Instrument) -> Result<(), CmdError> {
        let conn = open_db(&self.db_path)?;
        insert_instrument(&conn, instrument)?;
        println!("Registered {}", instrument);
        Ok(())
    }

    fn run_instrument_list(&self) -> Result<(), CmdError> {
        let conn = open_db(&self.db_path)?;
        let registry = InstrumentRegistry::load(&conn)?;
        if registry.is_empty() {
            println!("No instruments registered.");
        }
        for instrument in registry.all() {
            println!("{}\t{}", instrument.serial, instrument.model);
        }
        Ok(())
    }

    fn run_upload(&mut self, u: &Upload) -> Result<(), CmdError> {
        let conn = open_db(&self.db_path)?;
        let tz = u.tz.unwrap_or(UTC);

        let files = resolve_inputs(&u.inputs);
        if files.is_empty() {
            println!("No files found among inputs {:?}", u.inputs);
            return Ok(());
        }

        let serial = match u.file_type {
            DataType::Gas => Some(gas_upload_serial(&conn, u)?),
            _ => None,
        };

        let (progress_sender, progress_receiver) = unbounded_channel::<ProcessEvent>();
        self.progress_receiver = Some(progress_receiver);

        for file in &files {
            if let Err(e) = upload_file(&conn, u, serial.as_deref(), file, tz, &progress_sender) {
                tracing::warn!("upload of {} failed: {}", file.display(), e);
                let event = match e {
                    CmdError::Ingest(e) => {
                        ProcessEvent::Read(ReadEvent::data_fail(u.file_type, file, e.to_string()))
                    },
                    other => ProcessEvent::Insert(InsertEvent::Fail(other.to_string())),
                };
                let _ = progress_sender.send(event);
            }
            self.handle_progress_messages();
        }

        drop(progress_sender);
        self.handle_progress_messages();
        Ok(())
    }

    fn run_process(&mut self, r: &Run) -> Result<BatchSummary, CmdError> {
        let conn = open_db(&self.db_path)?;

        let start_date = r
            .start
            .or_else(|| get_newest_measurement_day(&conn))
            .unwrap_or_default();
        let end_date = r.end.unwrap_or_else(Utc::now);
        if start_date > end_date {
            return Err(CmdError::Msg("Start time can't be after end time.".to_string()));
        }

        let registry = select_instruments(InstrumentRegistry::load(&conn)?, r.serial.as_deref())?;
        let definitions = CycleDefinitionSource::range_query(&conn, start_date, end_date)?;
        drop(conn);
        if definitions.is_empty() {
            println!("No cycles found between {} and {}", start_date, end_date);
            return Ok(BatchSummary::default());
        }
        println!("Initiating from {} to {}", start_date, end_date);

        let config = CycleConfig {
            validation: ValidationConfig {
                check_r_spread: r.check_r_spread,
                ..ValidationConfig::default()
            },
            ..CycleConfig::default()
        };
        let meteo_source = r.meteo_source.clone();
        let db_path = self.db_path.clone();

        let (progress_sender, progress_receiver) = unbounded_channel::<ProcessEvent>();
        self.progress_receiver = Some(progress_receiver);

        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
        // rusqlite connections are not Sync, the worker opens its own
        let handle = runtime.spawn_blocking(move || -> Result<BatchSummary, QueryError> {
            let conn = open_db(&db_path)?;
            let processor = Processor::new(
                Datasets { gas: &conn, environment: &conn },
                Infra { store: &conn, progress: progress_sender },
                registry,
            )
            .with_config(config)
            .with_meteo_source(meteo_source);
            processor.run(&definitions)
        });

        loop {
            self.handle_progress_messages();
            if handle.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        let summary = runtime
            .block_on(handle)
            .map_err(|e| CmdError::Msg(format!("calculation task failed: {e}")))??;
        self.handle_progress_messages();

        println!(
            "Calculated {}, recalculated {}, up to date {}, no gas data {}, failed {}.",
            summary.computed, summary.recalculated, summary.skipped, summary.no_data, summary.failed
        );
        Ok(summary)
    }

    fn run_export(&self, ex: &Export) -> Result<(), CmdError> {
        if ex.start >= ex.end {
            return Err(CmdError::Msg("Start time must be before end time.".to_string()));
        }
        let conn = open_db(&self.db_path)?;
        let rows = PersistenceGateway::range_query(
            &conn,
            ex.start,
            ex.end,
            &ex.chambers,
            ex.valid,
            ex.serial.as_deref(),
        )?;

        match &ex.output {
            Some(path) => {
                let n = write_flux_csv(File::create(path)?, &rows)?;
                println!("Wrote {} rows to {}", n, path.display());
            },
            None => {
                let n = write_flux_csv(std::io::stdout().lock(), &rows)?;
                tracing::info!("wrote {} rows", n);
            },
        }
        Ok(())
    }

    fn run_cycle(&self, c: &CycleAction) -> Result<(), CmdError> {
        let conn = open_db(&self.db_path)?;
        let row = find_row(&conn, c)?;
        if c.op == CycleOp::Show {
            println!("{}", serde_json::to_string_pretty(&row.to_dict())?);
            return Ok(());
        }

        let definition = row.definition().map_err(CycleError::from)?;
        let data =
            GasData::load(&conn, &row.instrument_serial, definition.start_time(), definition.end_time())?;
        let config = CycleConfig::default();

        let cycle = match c.op {
            CycleOp::Recalc => {
                let instrument = Instrument::new(row.instrument_model, row.instrument_serial.clone());
                let mut cycle =
                    CycleBuilder::new(definition, instrument).data(data).config(config).build(&conn)?;
                if row.is_valid_manual.is_some() {
                    cycle.set_is_valid_manual(row.is_valid_manual);
                }
                cycle
            },
            ref op => {
                let mut cycle = Cycle::from_row(&row, data, config)?;
                apply_op(&mut cycle, op, &conn)?;
                cycle
            },
        };

        PersistenceGateway::upsert(&conn, &cycle.attribute_row())?;
        println!("{}", serde_json::to_string_pretty(&cycle.attribute_dict())?);
        Ok(())
    }

    pub fn handle_progress_messages(&mut self) {
        if let Some(mut receiver) = self.progress_receiver.take() {
            drain_progress_messages(self, &mut receiver);
            self.progress_receiver = Some(receiver);
        }
    }
}

fn apply_op(cycle: &mut Cycle, op: &CycleOp, conn: &Connection) -> Result<(), CmdError> {
    match *op {
        CycleOp::Lag(lag) => cycle.manual_lag(lag),
        CycleOp::ResetLag => cycle.recalc(),
        CycleOp::Validity(valid) => cycle.set_is_valid_manual(valid),
        CycleOp::Window { gas, start, end } => cycle.set_calc_window(gas, start, end)?,
        CycleOp::NudgeEnd(delta) => cycle.nudge_end(delta, conn)?,
        CycleOp::Show | CycleOp::Recalc => {},
    }
    Ok(())
}

fn find_row(conn: &Connection, c: &CycleAction) -> Result<FluxRow, CmdError> {
    let row = match c.chamber.as_deref() {
        Some(chamber) => conn.get_cycle(c.start, chamber, &c.serial)?,
        None => PersistenceGateway::get(conn, c.start, &c.serial)?,
    };
    row.ok_or_else(|| {
        CmdError::Msg(format!("No calculated cycle at {} for instrument {}", c.start, c.serial))
    })
}

fn gas_upload_serial(conn: &Connection, u: &Upload) -> Result<String, CmdError> {
    let serial = u
        .serial
        .clone()
        .ok_or_else(|| CmdError::Msg("--serial is required for gas uploads".to_string()))?;
    match u.model {
        Some(model) => {
            insert_instrument(conn, &Instrument::new(model, serial.clone()))?;
        },
        None if InstrumentRegistry::load(conn)?.get(&serial).is_none() => {
            return Err(CmdError::Msg(format!(
                "Unknown instrument {serial}, register it with `instrument add` or pass --model"
            )));
        },
        None => {},
    }
    Ok(serial)
}

fn select_instruments(
    registry: InstrumentRegistry,
    serial: Option<&str>,
) -> Result<InstrumentRegistry, CmdError> {
    let Some(serial) = serial else {
        return Ok(registry);
    };
    let instrument = registry
        .get(serial)
        .cloned()
        .ok_or_else(|| CmdError::Msg(format!("No instrument registered with serial {serial}")))?;
    let mut selected = InstrumentRegistry::new();
    selected.register(instrument);
    Ok(selected)
}

fn upload_file(
    conn: &Connection,
    u: &Upload,
    serial: Option<&str>,
    path: &Path,
    tz: Tz,
    progress: &UnboundedSender<ProcessEvent>,
) -> Result<(), CmdError> {
    let name = path.display().to_string();
    let send = |event: ProcessEvent| {
        let _ = progress.send(event);
    };
    send(ProcessEvent::Read(ReadEvent::File(name.clone())));

    match u.file_type {
        DataType::Gas => {
            let samples = read_gas_csv(path, tz)?;
            send(ProcessEvent::Read(ReadEvent::FileRows(name, samples.len())));
            let inserted = insert_measurements(conn, serial.unwrap_or_default(), &samples)?;
            send(ProcessEvent::Insert(InsertEvent::okskip(
                u.file_type,
                inserted,
                samples.len() - inserted,
            )));
        },
        DataType::Cycle => {
            let times = read_cycle_csv(path, tz)?;
            send(ProcessEvent::Read(ReadEvent::FileRows(name, times.len())));
            let (inserted, skipped) = insert_cycles(conn, &times)?;
            send(ProcessEvent::Insert(InsertEvent::okskip(u.file_type, inserted, skipped)));
        },
        DataType::Meteo => {
            let source = u.source.as_deref().unwrap_or(DEFAULT_METEO_SOURCE);
            let meteo = read_meteo_csv(path, tz, source)?;
            send(ProcessEvent::Read(ReadEvent::FileRows(name, meteo.len())));
            let inserted = insert_meteo_data(conn, &meteo)?;
            send(ProcessEvent::Insert(InsertEvent::okskip(
                u.file_type,
                inserted,
                meteo.len() - inserted,
            )));
        },
        DataType::Height => {
            let heights = read_height_csv(path, tz)?;
            send(ProcessEvent::Read(ReadEvent::FileRows(name, heights.len())));
            let (inserted, marked) = insert_height_data(conn, &heights)?;
            send(ProcessEvent::Insert(InsertEvent::okskip(
                u.file_type,
                inserted,
                heights.len() - inserted,
            )));
            if marked > 0 {
                send(ProcessEvent::Insert(InsertEvent::HeightMarked(marked)));
            }
        },
    }
    Ok(())
}

pub fn drain_progress_messages<T: ProcessEventSink>(
    sink: &mut T,
    receiver: &mut UnboundedReceiver<ProcessEvent>,
) {
    loop {
        match receiver.try_recv() {
            Ok(msg) => sink.dispatch(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

impl ProcessEventSink for Config {
    fn on_query_event(&mut self, ev: &QueryEvent) {
        match ev {
            QueryEvent::QueryComplete => {
                println!("Finished queries.");
            },
            QueryEvent::NoGasData(cycle) => {
                println!("No gas data found for cycle {}", cycle);
            },
            QueryEvent::DbFail(msg) => {
                println!("{}", msg);
            },
        }
    }

    fn on_progress_event(&mut self, ev: &ProgressEvent) {
        match ev {
            ProgressEvent::CalculationStarted(total) => {
                println!("Calculating {} cycles.", total);
            },
            ProgressEvent::Rows(done, total) => {
                println!("{}/{} cycles done", done, total);
            },
            ProgressEvent::Recalced(cycle) => {
                println!("Recalculated {} with new chamber height", cycle);
            },
            ProgressEvent::CycleFail(cycle, e) => {
                println!("Failed to calculate {}: {}", cycle, e);
            },
            ProgressEvent::Generic(msg) => {
                println!("{}", msg);
            },
        }
    }

    fn on_read_event(&mut self, ev: &ReadEvent) {
        match ev {
            ReadEvent::File(filename) => {
                println!("Read file: {}", filename);
            },
            ReadEvent::FileRows(filename, rows) => {
                println!("Read file: {} with {} rows", filename, rows);
            },
            ReadEvent::DataFail { kind, file, reason } => {
                println!("Could not parse as {} file: {}, {}", kind.type_str(), file, reason);
            },
        }
    }

    fn on_insert_event(&mut self, ev: &InsertEvent) {
        match ev {
            InsertEvent::DataOkSkip { kind, inserts, skips } => {
                if *skips == 0 {
                    println!("{}: inserted {} rows.", kind, inserts);
                } else {
                    println!(
                        "{}: inserted {} rows, skipped {} duplicates or invalid rows.",
                        kind, inserts, skips
                    );
                }
            },
            InsertEvent::HeightMarked(n) => {
                println!("Marked {} calculated cycles for recalculation with new chamber height.", n);
            },
            InsertEvent::Fail(e) => {
                println!("Failed to insert rows: {}", e);
            },
        }
    }

    fn on_done(&mut self, res: &Result<(), String>) {
        match res {
            Ok(()) => {
                println!("All processing finished.");
            },
            Err(e) => {
                println!("Processing finished with error: {}", e);
            },
        }
    }
}

/// Newest calculated cycle, where an incremental run picks up.
pub fn get_newest_measurement_day(conn: &Connection) -> Option<DateTime<Utc>> {
    let timestamp: Option<i64> =
        conn.query_row("SELECT MAX(start_time) FROM fluxes", [], |row| row.get(0)).ok()?;
    DateTime::from_timestamp(timestamp?, 0)
}

fn resolve_inputs(inputs: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for inp in inputs {
        if inp.contains('*') || inp.contains('?') || inp.contains('[') {
            match glob(inp) {
                Ok(paths) => out.extend(paths.filter_map(Result::ok)),
                Err(e) => tracing::warn!("invalid glob '{}': {}", inp, e),
            }
        } else {
            out.push(PathBuf::from(inp));
        }
    }
    out
}
