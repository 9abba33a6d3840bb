use crate::datatype::DataType;

#[derive(Debug)]
pub enum ProcessEvent {
    Query(QueryEvent),
    Read(ReadEvent),
    Insert(InsertEvent),
    Progress(ProgressEvent),
    Done(Result<(), String>),
}

#[derive(Debug)]
pub enum QueryEvent {
    QueryComplete,
    NoGasData(String),
    DbFail(String),
}

#[derive(Debug)]
pub enum ReadEvent {
    File(String),
    FileRows(String, usize),
    DataFail { kind: DataType, file: String, reason: String },
}

#[derive(Debug)]
pub enum InsertEvent {
    DataOkSkip { kind: DataType, inserts: usize, skips: usize },
    /// stored flux rows whose chamber height changed
    HeightMarked(usize),
    Fail(String),
}

#[derive(Debug)]
pub enum ProgressEvent {
    CalculationStarted(usize),
    /// cycles handled so far, total
    Rows(usize, usize),
    Recalced(String),
    CycleFail(String, String),
    Generic(String),
}

pub trait ProcessEventSink {
    fn on_query_event(&mut self, ev: &QueryEvent);
    fn on_progress_event(&mut self, ev: &ProgressEvent);
    fn on_read_event(&mut self, ev: &ReadEvent);
    fn on_insert_event(&mut self, ev: &InsertEvent);
    fn on_done(&mut self, res: &Result<(), String>);

    fn dispatch(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Query(ev) => self.on_query_event(&ev),
            ProcessEvent::Progress(ev) => self.on_progress_event(&ev),
            ProcessEvent::Read(ev) => self.on_read_event(&ev),
            ProcessEvent::Insert(ev) => self.on_insert_event(&ev),
            ProcessEvent::Done(res) => self.on_done(&res),
        }
    }
}

impl ReadEvent {
    pub fn data_fail(
        kind: DataType,
        file: impl AsRef<std::path::Path>,
        reason: impl Into<String>,
    ) -> Self {
        let file_str = file.as_ref().to_string_lossy().into_owned();
        Self::DataFail { kind, file: file_str, reason: reason.into() }
    }
}

impl InsertEvent {
    pub fn okskip(kind: DataType, inserts: usize, skips: usize) -> Self {
        Self::DataOkSkip { kind, inserts, skips }
    }
}
