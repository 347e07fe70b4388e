//! The report engine: one reconciliation run over every configured program.
//!
//! EXECUTION ORDER per program (fixed, never reordered):
//!   1. PULL       delivered + fraud reports, all platforms, organic removed
//!   2. NORMALIZE  derived agency / touch type / lookback hours
//!   3. FLAG       program rule over delivered events
//!   4. DEDUPE     drop flagged events already in the fraud feed
//!   5. AGGREGATE  per-agency counts
//!   6. SUMMARIZE  left-joined summary with rates and net valid
//!
//! RULES:
//!   - Programs run in registration order but share no state; any order
//!     yields the same reports.
//!   - Every stage event is recorded in the run's event log.
//!   - Summaries are stored so totals and top-N excerpts come from one place.

use crate::{
    aggregate::SummaryRow,
    config::{ProgramConfig, ReportConfig},
    error::{ReportError, ReportResult},
    event::{EventLogEntry, StageEvent},
    notify::ProgramDigest,
    period::ReportPeriod,
    reconcile::{ProgramReport, Reconciler},
    source::{pull_program_sets, ReportSource},
    store::ReportStore,
    types::RunId,
};

pub struct ReportEngine {
    pub run_id:  RunId,
    pub period:  ReportPeriod,
    pub store:   ReportStore,
    source:      Box<dyn ReportSource>,
    reconcilers: Vec<Reconciler>,
}

impl ReportEngine {
    /// Create an engine with no programs registered. The store must already
    /// be migrated; the run row is inserted here.
    pub fn new(
        period: ReportPeriod,
        store: ReportStore,
        source: Box<dyn ReportSource>,
    ) -> ReportResult<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        store.insert_run(&run_id, &period, env!("CARGO_PKG_VERSION"))?;

        let engine = Self {
            run_id: run_id.clone(),
            period,
            store,
            source,
            reconcilers: Vec::new(),
        };
        engine.record(
            None,
            &StageEvent::RunInitialized {
                run_id,
                period_from: period.from_param(),
                period_to: period.to_param(),
            },
        )?;
        Ok(engine)
    }

    /// Build a fully wired engine with every configured program registered,
    /// backed by a fresh in-memory store.
    pub fn build(
        config: &ReportConfig,
        period: ReportPeriod,
        source: Box<dyn ReportSource>,
    ) -> ReportResult<Self> {
        let store = ReportStore::in_memory()?;
        store.migrate()?;
        let mut engine = Self::new(period, store, source)?;
        for program in &config.programs {
            engine.register(program.clone());
        }
        Ok(engine)
    }

    /// Engine over ReportConfig::default_test() programs.
    pub fn build_test(period: ReportPeriod, source: Box<dyn ReportSource>) -> ReportResult<Self> {
        Self::build(&ReportConfig::default_test(), period, source)
    }

    /// Register a program. Call in the order reports should be produced.
    pub fn register(&mut self, program: ProgramConfig) {
        self.reconcilers.push(Reconciler::new(program));
    }

    pub fn program_ids(&self) -> Vec<&str> {
        self.reconcilers.iter().map(|r| r.program().id.as_str()).collect()
    }

    /// Run every registered program once.
    pub fn run(&self) -> ReportResult<Vec<ProgramReport>> {
        log::info!(
            "run {}: period {} to {}, {} programs",
            self.run_id,
            self.period.from_param(),
            self.period.to_param(),
            self.reconcilers.len()
        );
        self.reconcilers
            .iter()
            .map(|r| self.run_reconciler(r))
            .collect()
    }

    /// Run a single registered program.
    pub fn run_program(&self, program_id: &str) -> ReportResult<ProgramReport> {
        let reconciler = self
            .reconcilers
            .iter()
            .find(|r| r.program().id == program_id)
            .ok_or_else(|| ReportError::ProgramNotFound { id: program_id.to_string() })?;
        self.run_reconciler(reconciler)
    }

    fn run_reconciler(&self, reconciler: &Reconciler) -> ReportResult<ProgramReport> {
        self.store.require_run(&self.run_id)?;
        let program = reconciler.program();
        log::info!("{}: starting ({})", program.id, program.label);

        // PULL
        let sets = pull_program_sets(self.source.as_ref(), program, &self.period);
        self.record(
            Some(&program.id),
            &StageEvent::Pulled {
                program_id: program.id.clone(),
                delivered: sets.delivered.len(),
                fraud: sets.fraud.len(),
            },
        )?;

        // NORMALIZE .. SUMMARIZE
        let (report, events) = reconciler.reconcile(sets);
        for event in &events {
            self.record(Some(&program.id), event)?;
        }

        self.store.save_summary(&self.run_id, &program.id, &report.summary)?;
        Ok(report)
    }

    /// Totals and top-N agencies for a program, read back from the store.
    pub fn digest(&self, program: &ProgramConfig, top_n: usize) -> ReportResult<ProgramDigest> {
        let totals = self.store.program_totals(&self.run_id, &program.id)?;
        let top_agencies: Vec<SummaryRow> =
            self.store.top_agencies_by_net_valid(&self.run_id, &program.id, top_n)?;
        Ok(ProgramDigest {
            program_id:    program.id.clone(),
            label:         program.label.clone(),
            event_name:    program.event_name.clone(),
            flagged_label: program.flagged.label.clone(),
            totals,
            top_agencies,
            report_links:  Vec::new(),
        })
    }

    pub fn events_for_program(&self, program_id: &str) -> ReportResult<Vec<EventLogEntry>> {
        self.store.events_for_program(&self.run_id, program_id)
    }

    fn record(&self, program_id: Option<&str>, event: &StageEvent) -> ReportResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            program_id: program_id.map(str::to_string),
            stage:      event.stage().map(|s| s.as_str().to_string()),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.store.append_event(&entry)?;
        log::debug!("{}: {}", program_id.unwrap_or("run"), entry.event_type);
        Ok(())
    }
}
