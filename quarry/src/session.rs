//! A reporting session: the query builder, script runner, results view,
//! charts and notifications working together.

use std::time::Instant;

use log::{debug, info};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::{
    builder::{QueryBuilder, TemplateOutcome},
    chart::ChartAdapter,
    config::{Config, SlotCount},
    executor::QueryExecutor,
    export::{self, CsvDelivery, Delivery},
    notify::Notifier,
    present::{RawData, ResultsView},
    sandbox::{ScriptOutput, ScriptRunner},
    template::Template,
    Error, ExportError,
};

/// Coarse progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStep {
    Executing,
    Parsing,
    Processing,
    Complete,
}

impl ProgressStep {
    pub fn percent(self) -> u8 {
        match self {
            Self::Executing => 20,
            Self::Parsing => 50,
            Self::Processing => 70,
            Self::Complete => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Executing => "Executing queries...",
            Self::Parsing => "Parsing results...",
            Self::Processing => "Processing data...",
            Self::Complete => "Complete",
        }
    }
}

/// Everything a run needs, detached from the session so that the session can
/// be cancelled or reset while the run is pending.
#[derive(Debug)]
pub struct RunTicket {
    pub generation: u64,
    pub queries: Vec<String>,
    pub script: String,
    runner: ScriptRunner,
    progress: watch::Sender<Option<ProgressStep>>,
}

impl RunTicket {
    fn report(&self, step: ProgressStep) {
        // Nobody is listening once the ticket has been superseded.
        let _ = self.progress.send(Some(step));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSuccess {
    pub output: ScriptOutput,
    pub row_sets: Vec<JsonValue>,
    pub total_records: usize,
}

pub type RunOutcome = Result<RunSuccess, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed { total_records: usize },
    Failed(String),
    /// The run was superseded or cancelled; its result was discarded.
    Stale,
}

// Error messages are lower case; toasts read as sentences.
fn sentence(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A single user's reporting session.
#[derive(Debug)]
pub struct ReportSession {
    config: Config,
    builder: QueryBuilder,
    runner: ScriptRunner,
    view: Option<ResultsView>,
    charts: ChartAdapter,
    notifier: Notifier,
    delivery: CsvDelivery,
    generation: u64,
    progress: watch::Receiver<Option<ProgressStep>>,
    last_error: Option<String>,
    last_template: Option<String>,
}

impl ReportSession {
    pub fn new(config: &Config, charts: ChartAdapter) -> Self {
        Self {
            config: config.clone(),
            builder: QueryBuilder::new(config),
            runner: ScriptRunner::new(config),
            view: None,
            charts,
            notifier: Notifier::new(config),
            delivery: CsvDelivery::default(),
            generation: 0,
            progress: watch::channel(None).1,
            last_error: None,
            last_template: None,
        }
    }

    pub fn with_delivery(mut self, delivery: CsvDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut QueryBuilder {
        &mut self.builder
    }

    pub fn view(&self) -> Option<&ResultsView> {
        self.view.as_ref()
    }

    pub fn view_mut(&mut self) -> Option<&mut ResultsView> {
        self.view.as_mut()
    }

    pub fn charts(&self) -> &ChartAdapter {
        &self.charts
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.notifier
    }

    pub fn progress(&self) -> Option<ProgressStep> {
        *self.progress.borrow()
    }

    pub fn is_executing(&self) -> bool {
        self.builder.is_executing()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The name of the most recently applied template.
    pub fn last_template(&self) -> Option<&str> {
        self.last_template.as_deref()
    }

    /// Advance toast timers.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.notifier.tick(now)
    }

    fn set_progress(&mut self, step: Option<ProgressStep>) {
        self.progress = watch::channel(step).1;
    }

    fn clear_results(&mut self) {
        self.charts.destroy_all();
        self.view = None;
    }

    /// Switch the number of query slots. Clears the builder and any results.
    pub fn set_slot_count(&mut self, count: usize) -> Result<(), Error> {
        let slot_count = SlotCount::try_from(count)?;
        self.builder.set_slot_count(count)?;
        self.config = self.config.clone().with_slot_count(slot_count);
        self.runner = ScriptRunner::new(&self.config);
        self.clear_results();
        Ok(())
    }

    /// Start a run with the builder's current queries and script.
    ///
    /// Pending validations run first. Nothing is sent to the backend unless
    /// every non-blank query and the script pass validation.
    pub fn begin_run(&mut self) -> Result<RunTicket, Error> {
        if self.builder.is_executing() {
            return Err(Error::RunInProgress);
        }
        let queries = self.builder.executable_queries();
        if queries.is_empty() {
            self.notifier
                .error(sentence(&Error::NoQueries.to_string()), Instant::now());
            return Err(Error::NoQueries);
        }
        self.builder.flush_validation();
        if !self.builder.can_execute() {
            self.notifier.error(
                sentence(&Error::ValidationFailed.to_string()),
                Instant::now(),
            );
            return Err(Error::ValidationFailed);
        }
        self.generation += 1;
        self.builder.set_executing(true);
        self.last_error = None;
        self.clear_results();

        let (progress, rx) = watch::channel(Some(ProgressStep::Executing));
        self.progress = rx;
        self.notifier.info("Query execution started...", Instant::now());
        debug!(
            "Run {} started with {} queries",
            self.generation,
            queries.len()
        );
        Ok(RunTicket {
            generation: self.generation,
            queries,
            script: self.builder.script().to_string(),
            runner: self.runner.clone(),
            progress,
        })
    }

    /// Execute the queries of a ticket and run the script over their results.
    pub async fn run_ticket(ticket: &RunTicket, executor: &dyn QueryExecutor) -> RunOutcome {
        let batch = executor.execute(&ticket.queries).await?;
        debug!(
            "Queries returned {} records in {}ms",
            batch.total_records(),
            batch.total_execution_time_ms
        );
        ticket.report(ProgressStep::Parsing);
        let row_sets = batch.row_sets(ticket.runner.slot_count().get())?;
        ticket.report(ProgressStep::Processing);
        let output = ticket.runner.execute(&ticket.script, row_sets.clone()).await?;
        Ok(RunSuccess {
            output,
            row_sets,
            total_records: batch.total_records(),
        })
    }

    /// Apply the outcome of a run, unless a newer run or a cancellation has
    /// superseded it.
    pub fn complete_run(&mut self, ticket: RunTicket, outcome: RunOutcome) -> RunStatus {
        if ticket.generation != self.generation {
            debug!(
                "Discarding result of run {} (current run is {})",
                ticket.generation, self.generation
            );
            return RunStatus::Stale;
        }
        self.builder.set_executing(false);

        match outcome {
            Ok(success) => {
                let view = ResultsView::new(success.output.data, &self.config).with_raw_data(
                    RawData {
                        row_sets: success.row_sets,
                        queries: ticket.queries,
                        script: ticket.script,
                    },
                );
                self.charts.show(&view);
                self.view = Some(view);
                self.set_progress(Some(ProgressStep::Complete));

                let n = success.total_records;
                let message = match &self.last_template {
                    Some(name) => format!(
                        "Template \"{}\" executed successfully! Processed {} records.",
                        name, n
                    ),
                    None => format!("Query completed successfully! Processed {} records.", n),
                };
                self.notifier.success(message, Instant::now());
                RunStatus::Completed { total_records: n }
            }
            Err(e) => {
                let message = sentence(&e.to_string());
                self.set_progress(None);
                self.last_error = Some(message.clone());
                self.notifier.error(message.clone(), Instant::now());
                RunStatus::Failed(message)
            }
        }
    }

    /// Run the builder's queries and script to completion.
    pub async fn execute(&mut self, executor: &dyn QueryExecutor) -> Result<RunStatus, Error> {
        let ticket = self.begin_run()?;
        let outcome = Self::run_ticket(&ticket, executor).await;
        Ok(self.complete_run(ticket, outcome))
    }

    /// Clear the last error and run again.
    pub async fn retry(&mut self, executor: &dyn QueryExecutor) -> Result<RunStatus, Error> {
        self.last_error = None;
        self.notifier.dismiss();
        self.execute(executor).await
    }

    /// Abandon the current run. Its result is discarded when it arrives.
    pub fn cancel(&mut self) -> bool {
        if !self.builder.is_executing() {
            return false;
        }
        self.generation += 1;
        self.builder.set_executing(false);
        self.set_progress(None);
        self.notifier.info("Query execution cancelled", Instant::now());
        true
    }

    /// Load a template into the builder, switching the slot count to the
    /// template's if necessary.
    pub fn apply_template(&mut self, template: &Template) -> Result<TemplateOutcome, Error> {
        if template.query_count != self.builder.slot_count().get() {
            self.set_slot_count(template.query_count)?;
        }
        let outcome = self
            .builder
            .apply_template(&template.queries, &template.processor.javascript);
        self.clear_results();
        let now = Instant::now();
        match &outcome {
            TemplateOutcome::Applied { .. } => {
                info!("{}", outcome.message());
                self.last_template = Some(template.name.clone());
                self.notifier.success(
                    format!(
                        "Template \"{}\" applied successfully! Ready to execute.",
                        template.name
                    ),
                    now,
                );
            }
            TemplateOutcome::Failed { message, .. } => self.notifier.error(message.clone(), now),
        }
        Ok(outcome)
    }

    /// Back to a blank session. Any pending run is discarded.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.builder.clear_all();
        self.builder.set_executing(false);
        self.clear_results();
        self.set_progress(None);
        self.last_error = None;
        self.last_template = None;
        self.notifier
            .info("Application reset to initial state", Instant::now());
    }

    fn deliver(
        &mut self,
        prepared: Result<export::CsvExport, ExportError>,
    ) -> Result<Delivery, Error> {
        let now = Instant::now();
        let result = prepared.and_then(|csv| self.delivery.deliver(&csv.content, &csv.filename));
        match result {
            Ok(delivery) => {
                if delivery.is_fallback() {
                    self.notifier.warning(delivery.message(), now);
                } else {
                    self.notifier.success(delivery.message(), now);
                }
                Ok(delivery)
            }
            Err(e) => {
                self.notifier.error(sentence(&e.to_string()), now);
                Err(e.into())
            }
        }
    }

    /// Export one section of the current results as CSV.
    pub fn export_section(&mut self, section_id: &str) -> Result<Delivery, Error> {
        let prepared = match self.view.as_ref().and_then(|v| v.section(section_id)) {
            Some(section) => export::export_section(section),
            None => Err(ExportError::Empty),
        };
        self.deliver(prepared)
    }

    /// Export every table (or, failing that, every metric) as one CSV.
    pub fn export_dashboard(&mut self) -> Result<Delivery, Error> {
        let prepared = match &self.view {
            Some(view) => export::export_dashboard(view),
            None => Err(ExportError::Empty),
        };
        self.deliver(prepared)
    }
}
