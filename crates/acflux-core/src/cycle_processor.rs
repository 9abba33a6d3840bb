use crate::constants::CHUNK_SIZE;
use crate::cycle::cycle::{Cycle, CycleBuilder, CycleConfig};
use crate::cycle::definition::CycleDefinition;
use crate::cycle::record::FluxRow;
use crate::data_formats::gasdata::GasData;
use crate::error::{CycleError, QueryError};
use crate::instruments::{Instrument, InstrumentRegistry};
use crate::processevent::{ProcessEvent, ProgressEvent, QueryEvent};
use crate::traits::{EnvironmentProvider, PersistenceGateway, TimeSeriesProvider};

use tokio::sync::mpsc::UnboundedSender;

/// Where the processor reads samples and environment from and writes rows to.
pub struct Datasets<'a> {
    pub gas: &'a dyn TimeSeriesProvider,
    pub environment: &'a dyn EnvironmentProvider,
}

pub struct Infra<'a> {
    pub store: &'a dyn PersistenceGateway,
    pub progress: UnboundedSender<ProcessEvent>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub computed: usize,
    pub recalculated: usize,
    /// already stored and up to date
    pub skipped: usize,
    pub no_data: usize,
    pub failed: usize,
    pub written: usize,
}

enum Outcome {
    Computed(Box<FluxRow>),
    Recalculated(Box<FluxRow>),
    Skipped,
    NoData,
}

/// Batch initialization of cycles, one instrument at a time per definition.
pub struct Processor<'a> {
    data: Datasets<'a>,
    infra: Infra<'a>,
    instruments: InstrumentRegistry,
    config: CycleConfig,
    meteo_source: Option<String>,
}

impl<'a> Processor<'a> {
    pub fn new(data: Datasets<'a>, infra: Infra<'a>, instruments: InstrumentRegistry) -> Self {
        Self { data, infra, instruments, config: CycleConfig::default(), meteo_source: None }
    }

    pub fn with_config(mut self, config: CycleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_meteo_source(mut self, source: Option<String>) -> Self {
        self.meteo_source = source;
        self
    }

    fn send(&self, event: ProcessEvent) {
        // receiver gone means nobody is listening, the batch still runs
        let _ = self.infra.progress.send(event);
    }

    /// Processes `definitions` in chunks of [`CHUNK_SIZE`], writing each chunk in one
    /// transaction. A failing cycle is reported and skipped, a failing write stops the
    /// batch.
    pub fn run(&self, definitions: &[CycleDefinition]) -> Result<BatchSummary, QueryError> {
        let instruments = self.instruments.all();
        let mut summary = BatchSummary::default();
        if instruments.is_empty() {
            tracing::warn!("no instruments registered, nothing to calculate");
            self.send(ProcessEvent::Progress(ProgressEvent::Generic(
                "No instruments registered".to_owned(),
            )));
            self.send(ProcessEvent::Done(Ok(())));
            return Ok(summary);
        }

        let total = definitions.len() * instruments.len();
        self.send(ProcessEvent::Progress(ProgressEvent::CalculationStarted(total)));
        tracing::info!("calculating {} cycles for {} instruments", definitions.len(), instruments.len());

        let mut handled = 0;
        for chunk in definitions.chunks(CHUNK_SIZE) {
            let mut rows = Vec::new();
            for def in chunk {
                for instrument in &instruments {
                    handled += 1;
                    match self.process_one(def, instrument) {
                        Ok(Outcome::Computed(row)) => {
                            summary.computed += 1;
                            rows.push(*row);
                        },
                        Ok(Outcome::Recalculated(row)) => {
                            summary.recalculated += 1;
                            self.send(ProcessEvent::Progress(ProgressEvent::Recalced(
                                def.to_string(),
                            )));
                            rows.push(*row);
                        },
                        Ok(Outcome::Skipped) => summary.skipped += 1,
                        Ok(Outcome::NoData) => {
                            summary.no_data += 1;
                            self.send(ProcessEvent::Query(QueryEvent::NoGasData(format!(
                                "{}, {}",
                                def, instrument.serial
                            ))));
                        },
                        Err(e) => {
                            tracing::warn!("failed to process {} with {}: {}", def, instrument, e);
                            summary.failed += 1;
                            self.send(ProcessEvent::Progress(ProgressEvent::CycleFail(
                                def.to_string(),
                                e.to_string(),
                            )));
                        },
                    }
                }
            }

            if !rows.is_empty() {
                match self.infra.store.upsert_many(&rows) {
                    Ok(n) => summary.written += n,
                    Err(e) => {
                        tracing::error!("writing flux rows failed: {}", e);
                        self.send(ProcessEvent::Query(QueryEvent::DbFail(e.to_string())));
                        self.send(ProcessEvent::Done(Err(format!("Insert error: {e}"))));
                        return Err(e);
                    },
                }
            }
            self.send(ProcessEvent::Progress(ProgressEvent::Rows(handled, total)));
        }

        tracing::info!("batch finished: {:?}", summary);
        self.send(ProcessEvent::Query(QueryEvent::QueryComplete));
        self.send(ProcessEvent::Done(Ok(())));
        Ok(summary)
    }

    fn process_one(
        &self,
        def: &CycleDefinition,
        instrument: &Instrument,
    ) -> Result<Outcome, CycleError> {
        let stored =
            self.infra.store.get_cycle(def.start_time(), def.chamber_id(), &instrument.serial)?;

        if let Some(row) = stored {
            if !row.updated_height {
                return Ok(Outcome::Skipped);
            }
            let data =
                GasData::load(self.data.gas, &instrument.serial, def.start_time(), def.end_time())?;
            let cycle = Cycle::from_row(&row, data, self.config)?;
            return Ok(Outcome::Recalculated(Box::new(cycle.attribute_row())));
        }

        let data =
            GasData::load(self.data.gas, &instrument.serial, def.start_time(), def.end_time())?;
        if data.is_empty() {
            return Ok(Outcome::NoData);
        }
        let cycle = CycleBuilder::new(def.clone(), instrument.clone())
            .data(data)
            .meteo_source(self.meteo_source.clone())
            .config(self.config)
            .build(self.data.environment)?;
        Ok(Outcome::Computed(Box::new(cycle.attribute_row())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_formats::gasdata::{insert_measurements, GasSample};
    use crate::data_formats::heightdata::{insert_height_data, HeightData};
    use crate::data_formats::meteodata::{insert_meteo_data, MeteoData};
    use crate::db::fluxes_schema::initiate_tables;
    use crate::gastype::GasType;
    use crate::instruments::InstrumentType;

    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const SERIAL: &str = "TG10-01169";
    const DAY: i64 = 1_718_150_400; // 2024-06-12 00:00:00 UTC

    fn definition(hour: i64, chamber: &str) -> CycleDefinition {
        let start = Utc.timestamp_opt(DAY + hour * 3600, 0).unwrap();
        CycleDefinition::new(chamber, start, 60, 700, 900).unwrap()
    }

    fn samples(start: i64) -> Vec<GasSample> {
        (start..start + 900)
            .map(|t| {
                let e = (t - start - 60) as f64;
                let ch4 = if t < start + 700 { 2000.0 + 12.5 * e } else { 1900.0 };
                let co2 = if t < start + 700 { 420.0 + 0.5 * e } else { 410.0 };
                GasSample::new(t).with_value(GasType::CH4, Some(ch4)).with_value(GasType::CO2, Some(co2))
            })
            .collect()
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initiate_tables(&conn).unwrap();
        // data for the 08:00 and 09:00 cycles only
        let mut gas = samples(DAY + 8 * 3600);
        gas.extend(samples(DAY + 9 * 3600));
        insert_measurements(&conn, SERIAL, &gas).unwrap();

        let mut meteo = MeteoData::default();
        for h in 0..24 {
            meteo.push(DAY + h * 3600, "station", 15.0, 1005.0);
        }
        insert_meteo_data(&conn, &meteo).unwrap();
        conn
    }

    fn registry() -> InstrumentRegistry {
        let mut registry = InstrumentRegistry::new();
        registry.register(Instrument::new(InstrumentType::LI7810, SERIAL));
        registry
    }

    fn processor(conn: &Connection) -> (Processor<'_>, UnboundedReceiver<ProcessEvent>) {
        let (tx, rx) = unbounded_channel();
        let p = Processor::new(
            Datasets { gas: conn, environment: conn },
            Infra { store: conn, progress: tx },
            registry(),
        );
        (p, rx)
    }

    fn events(rx: &mut UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn computes_and_skips_missing_data() {
        let conn = setup();
        let (p, mut rx) = processor(&conn);
        let defs = vec![definition(8, "1"), definition(9, "1"), definition(10, "1")];

        let summary = p.run(&defs).unwrap();
        assert_eq!((summary.computed, summary.no_data, summary.written), (2, 1, 2));

        let evs = events(&mut rx);
        assert!(evs.iter().any(|e| matches!(e, ProcessEvent::Query(QueryEvent::NoGasData(_)))));
        assert!(matches!(evs.last(), Some(ProcessEvent::Done(Ok(())))));

        let row = conn.get(defs[0].start_time(), SERIAL).unwrap().unwrap();
        assert!(row.results[&GasType::CH4].flux > 0.0);
        assert_eq!(row.air_temperature, 15.0);
        assert!(row.default_height);
    }

    #[test]
    fn second_run_skips_stored_rows() {
        let conn = setup();
        let defs = vec![definition(8, "1"), definition(9, "1")];
        let (p, _rx) = processor(&conn);
        p.run(&defs).unwrap();

        let summary = p.run(&defs).unwrap();
        assert_eq!((summary.skipped, summary.computed, summary.written), (2, 0, 0));
    }

    #[test]
    fn shared_start_keeps_every_override() {
        let conn = setup();
        let defs = vec![definition(8, "1"), definition(8, "2")];
        let (p, _rx) = processor(&conn);
        assert_eq!(p.run(&defs).unwrap().computed, 2);
        conn.execute("UPDATE fluxes SET is_valid_manual = 0, is_valid = 0", []).unwrap();

        let summary = p.run(&defs).unwrap();
        assert_eq!((summary.skipped, summary.computed, summary.written), (2, 0, 0));
        for def in &defs {
            let row = conn.get_cycle(def.start_time(), def.chamber_id(), SERIAL).unwrap().unwrap();
            assert_eq!(row.is_valid_manual, Some(false), "chamber {}", def.chamber_id());
        }
    }

    #[test]
    fn stale_height_is_recalculated() {
        let conn = setup();
        let defs = vec![definition(8, "1"), definition(9, "1")];
        let (p, mut rx) = processor(&conn);
        p.run(&defs).unwrap();
        let before = conn.get(defs[1].start_time(), SERIAL).unwrap().unwrap();

        let mut heights = HeightData::default();
        heights.push(DAY + 9 * 3600 - 60, "1", 0.5);
        insert_height_data(&conn, &heights).unwrap();
        events(&mut rx);

        let summary = p.run(&defs).unwrap();
        assert_eq!((summary.skipped, summary.recalculated), (1, 1));
        assert!(events(&mut rx)
            .iter()
            .any(|e| matches!(e, ProcessEvent::Progress(ProgressEvent::Recalced(_)))));

        let after = conn.get(defs[1].start_time(), SERIAL).unwrap().unwrap();
        assert!(!after.updated_height);
        assert_eq!(after.chamber_height, 0.5);
        let ratio = after.results[&GasType::CH4].flux / before.results[&GasType::CH4].flux;
        assert!((ratio - 0.5).abs() < 1e-8);
        assert_eq!(after.lagtime, before.lagtime);
    }

    #[test]
    fn failing_cycle_is_reported_and_skipped() {
        let conn = setup();
        // a zero height is stored for chamber 2 only
        conn.execute(
            "INSERT INTO height (chamber_id, datetime, height) VALUES ('2', ?1, 0.0)",
            [DAY],
        )
        .unwrap();
        let (p, mut rx) = processor(&conn);
        let defs = vec![definition(8, "2"), definition(9, "1")];

        let summary = p.run(&defs).unwrap();
        assert_eq!((summary.failed, summary.computed), (1, 1));
        assert!(conn.get(defs[0].start_time(), SERIAL).unwrap().is_none());
        assert!(conn.get(defs[1].start_time(), SERIAL).unwrap().is_some());

        let evs = events(&mut rx);
        assert!(evs.iter().any(|e| matches!(e, ProcessEvent::Progress(ProgressEvent::CycleFail(_, _)))));
        assert!(matches!(evs.last(), Some(ProcessEvent::Done(Ok(())))));
    }

    #[test]
    fn chunks_report_progress() {
        let conn = setup();
        let (p, mut rx) = processor(&conn);
        let defs: Vec<CycleDefinition> = (0..150).map(|i| definition(0, &i.to_string())).collect();
        p.run(&defs).unwrap();

        let rows: Vec<(usize, usize)> = events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ProcessEvent::Progress(ProgressEvent::Rows(done, total)) => Some((done, total)),
                _ => None,
            })
            .collect();
        assert_eq!(rows, vec![(100, 150), (150, 150)]);
    }

    #[test]
    fn no_instruments_is_not_an_error() {
        let conn = setup();
        let (tx, mut rx) = unbounded_channel();
        let p = Processor::new(
            Datasets { gas: &conn, environment: &conn },
            Infra { store: &conn, progress: tx },
            InstrumentRegistry::new(),
        );
        assert_eq!(p.run(&[definition(8, "1")]).unwrap(), BatchSummary::default());
        assert!(matches!(events(&mut rx).last(), Some(ProcessEvent::Done(Ok(())))));
    }
}
