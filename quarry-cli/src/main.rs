use std::{fs, io, path::PathBuf};

use clap::{Parser, Subcommand};
use eyre::{bail, eyre, Result, WrapErr};
use log::{info, warn};
use quarry::{
    export::{ClipboardSink, FileSink},
    report,
    session::ProgressStep,
    ChartAdapter, Config, CsvDelivery, Error, ExportError, FileExecutor, QueryBuilder,
    QueryValidator, ReportSession, RunStatus, ScriptWorker, SlotCount, TemplateLibrary,
    ValidationResult,
};

#[derive(Parser, Debug)]
#[clap(name = "quarry", about, version)]
struct Args {
    /// Increase output logging verbosity.
    #[clap(short, long)]
    verbose: bool,

    /// Configuration file (YAML or JSON). Defaults apply if it does not
    /// exist.
    #[clap(short, long, default_value = "quarry.yaml")]
    config: PathBuf,

    /// Glob pattern for additional template files.
    #[clap(long)]
    template_files: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check queries and a processing script without running anything.
    Validate {
        /// A query to validate. May be given up to four times.
        #[clap(short, long)]
        query: Vec<String>,

        /// The processing script to validate.
        #[clap(short, long)]
        script: Option<PathBuf>,
    },
    /// Run queries against result fixtures and process them with a script.
    Run {
        /// Run the queries and script of a template.
        #[clap(short, long)]
        template: Option<String>,

        /// A query to run. May be given up to four times.
        #[clap(short, long)]
        query: Vec<String>,

        /// The processing script to run.
        #[clap(short, long)]
        script: Option<PathBuf>,

        /// JSON or YAML file holding the results of a query, in query order.
        #[clap(short, long)]
        rows: Vec<PathBuf>,

        /// Directory to write CSV exports of every section to.
        #[clap(long)]
        export_dir: Option<PathBuf>,

        /// Export every section, copying to the clipboard when no export
        /// directory is given or writing there fails.
        #[clap(long)]
        clipboard: bool,

        /// Write a standalone HTML report to this file.
        #[clap(long)]
        html: Option<PathBuf>,
    },
    /// List the available report templates.
    Templates {
        /// Only list templates in this category.
        #[clap(long, default_value = "All")]
        category: String,

        /// Only list templates matching this search term.
        #[clap(long, default_value = "")]
        search: String,
    },
    /// Serve a single script run over stdin and stdout.
    #[clap(hide = true)]
    ScriptWorker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    // stdout carries the worker's reply, so it must not be shared with logs
    if let Command::ScriptWorker = args.command {
        if let Err(e) = quarry::serve_worker(io::stdin().lock(), io::stdout().lock()) {
            eprintln!("Failed: {}", e);
            std::process::exit(1);
        }
        return;
    }
    simple_logger::init_with_level(if args.verbose {
        log::Level::Debug
    } else {
        log::Level::Info
    })
    .unwrap();

    match execute(args).await {
        Ok(_) => info!("Success!"),
        Err(e) => {
            log::error!("Failed: {:?}", e);
            std::process::exit(1);
        }
    }
}

async fn execute(args: Args) -> Result<()> {
    let mut config = Config::load_or_default(&args.config)?;
    if config.script_worker.is_none() {
        let exe = std::env::current_exe().wrap_err("failed to locate the quarry executable")?;
        config = config.with_script_worker(ScriptWorker::new(exe).with_args(["script-worker"]));
    }
    let library = || -> Result<TemplateLibrary> {
        let mut lib = TemplateLibrary::builtin(&config)?;
        if let Some(pattern) = &args.template_files {
            let added = lib.load_files(pattern)?;
            info!("Loaded {} additional template(s)", added);
        }
        Ok(lib)
    };

    match args.command {
        Command::Validate { query, script } => validate(&config, &query, script),
        Command::Run {
            template,
            query,
            script,
            rows,
            export_dir,
            clipboard,
            html,
        } => {
            let template = match template {
                Some(id) => Some(library()?.get(&id)?.clone()),
                None => None,
            };
            let charts = ChartAdapter::load(report::ChartJs::load()).await;
            let mut session = ReportSession::new(&config, charts);
            let mut delivery = CsvDelivery::new();
            if let Some(dir) = &export_dir {
                delivery = delivery.with_save(Box::new(FileSink::new(dir)));
            }
            if clipboard {
                delivery = delivery.with_clipboard(Box::new(ClipboardSink::platform_default()));
            }
            session = session.with_delivery(delivery);
            match &template {
                Some(t) => {
                    let outcome = session.apply_template(t)?;
                    if !outcome.is_applied() {
                        bail!(outcome.message());
                    }
                }
                None => load_inputs(&mut session, &query, script)?,
            }
            run(&mut session, rows).await?;

            let title = template
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "Quarry Report".to_string());
            if export_dir.is_some() || clipboard {
                export_all(&mut session)?;
            }
            if let Some(path) = html {
                let view = session.view().ok_or_else(|| eyre!("no results to render"))?;
                report::write_html(&path, &title, view, session.charts())?;
                info!("Report written to {}", path.display());
            }
            Ok(())
        }
        Command::Templates { category, search } => {
            let lib = library()?;
            let templates = lib.filter(&category, &search);
            info!("{} ({})", lib.count_text(templates.len()), lib.mode_label());
            for t in templates {
                info!(
                    "{} - {} [{}, {}, {} queries]",
                    t.id, t.name, t.category, t.complexity, t.query_count
                );
            }
            Ok(())
        }
        Command::ScriptWorker => bail!("the script worker is served before logging starts"),
    }
}

fn slot_count_for(config: &Config, queries: &[String]) -> Result<SlotCount> {
    Ok(match queries.len() {
        0..=2 => config.slot_count,
        3 | 4 => SlotCount::Four,
        n => bail!("at most 4 queries are supported, got {}", n),
    })
}

fn read_script(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).wrap_err_with(|| format!("failed to read script {}", path.display()))
}

fn report_validation(what: &str, result: &ValidationResult) -> bool {
    for e in &result.errors {
        warn!("{}: {}", what, e);
    }
    result.is_valid
}

fn validate(config: &Config, queries: &[String], script: Option<PathBuf>) -> Result<()> {
    let config = config.clone().with_slot_count(slot_count_for(config, queries)?);
    let validator = QueryValidator::new(&config);
    let mut valid = true;
    for (i, q) in queries.iter().enumerate() {
        let what = format!("Query {}", i + 1);
        valid &= report_validation(&what, &validator.validate_query(q));
        if let Some(estimate) = validator.estimate_rows(q) {
            info!("{}: estimated rows: {}", what, estimate);
        }
    }
    if let Some(path) = script {
        valid &= report_validation("Script", &validator.validate_script(&read_script(&path)?));
    }
    if !valid {
        bail!("validation failed");
    }
    Ok(())
}

fn load_inputs(session: &mut ReportSession, queries: &[String], script: Option<PathBuf>) -> Result<()> {
    let slot_count = slot_count_for(session.config(), queries)?;
    if slot_count != session.builder().slot_count() {
        session.set_slot_count(slot_count.get())?;
    }
    let script = script.ok_or_else(|| eyre!("either --template or --script is required"))?;
    let builder = session.builder_mut();
    for (slot, q) in queries.iter().enumerate() {
        builder.change_query(slot, q)?;
    }
    builder.change_script(&read_script(&script)?);
    Ok(())
}

fn check_builder(builder: &QueryBuilder) -> Result<()> {
    let mut valid = report_validation("Script", builder.script_validation());
    for input in builder.inputs() {
        valid &= report_validation(&input.title, &input.validation);
    }
    if !valid {
        bail!("fix the validation errors above before running");
    }
    Ok(())
}

async fn run(session: &mut ReportSession, rows: Vec<PathBuf>) -> Result<()> {
    check_builder(session.builder())?;
    let executor = FileExecutor::new(rows);
    let ticket = session.begin_run()?;
    info!("{} ({}%)", ProgressStep::Executing.label(), ProgressStep::Executing.percent());
    let outcome = ReportSession::run_ticket(&ticket, &executor).await;
    match session.complete_run(ticket, outcome) {
        RunStatus::Completed { total_records } => {
            info!("Processed {} records", total_records);
        }
        RunStatus::Failed(message) => bail!(message),
        RunStatus::Stale => bail!("run was superseded"),
    }

    let view = session.view().ok_or_else(|| eyre!("no results"))?;
    for section in view.sections() {
        info!("{} [{}] {}", section.title, section.kind(), section.id);
    }
    Ok(())
}

fn export_all(session: &mut ReportSession) -> Result<()> {
    let ids = session
        .view()
        .map(|v| v.sections().iter().map(|s| s.id.clone()).collect::<Vec<String>>())
        .unwrap_or_default();
    for id in ids {
        match session.export_section(&id) {
            Ok(delivery) => info!("{}", delivery.message()),
            Err(Error::Export(e @ ExportError::Unsupported { .. })) => warn!("{}: {}", id, e),
            Err(e) => return Err(e.into()),
        }
    }
    match session.export_dashboard() {
        Ok(delivery) => info!("{}", delivery.message()),
        Err(Error::Export(ExportError::Empty)) => warn!("Nothing to export for the dashboard"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
