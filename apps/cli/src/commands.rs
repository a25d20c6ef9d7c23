//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use smartadmit_core::{
    AdmissionStage, Advance, ClientFactory, Intake, PipelineClients, ResearchSettings, RunState,
    Session, StageProgress, apply_answer, follow_up_questions, render_report,
};
use smartadmit_providers::{OpenRouterClient, PageFetcher, PdfDocumentExtractor, SerperSearch};
use smartadmit_shared::{
    AppConfig, Credentials, ProfileField, Reconciled, RunId, SmartAdmitError, StageResult, expand_home,
    init_config, load_config, load_config_from, resolve_credentials,
};
use smartadmit_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SmartAdmit: university, scholarship, and review research from a student profile.
#[derive(Parser)]
#[command(
    name = "smartadmit",
    version,
    about = "Turn a free-text student profile into program, scholarship, and review recommendations.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.smartadmit/smartadmit.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Run database (overrides `[defaults] database`).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Reasoning provider API key (overrides the configured env var).
    #[arg(long, global = true)]
    pub openrouter_key: Option<String>,

    /// Search provider API key (overrides the configured env var).
    #[arg(long, global = true)]
    pub serper_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a profile and start a new run.
    Start {
        /// Profile text. Read from --file or stdin when omitted.
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// File holding the profile text.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Recommendation letter (PDF or text).
        #[arg(long)]
        document: Option<PathBuf>,

        /// Ask follow-up questions for missing profile fields.
        #[arg(short, long)]
        interactive: bool,

        /// Create the run without executing any stage.
        #[arg(long)]
        no_run: bool,
    },

    /// Execute the next pipeline stage of a run.
    Advance {
        /// Run id (defaults to the most recent run).
        #[arg(long)]
        run: Option<String>,
    },

    /// Execute every remaining stage of a run.
    Resume {
        #[arg(long)]
        run: Option<String>,
    },

    /// Show a run's phase and per-stage status.
    Status {
        #[arg(long)]
        run: Option<String>,
    },

    /// Print stored stage results.
    Show {
        #[arg(long)]
        run: Option<String>,

        /// Only this stage (e.g. ranked_programs).
        #[arg(long)]
        stage: Option<String>,

        /// Print the raw model text instead of the reconciled form.
        #[arg(long)]
        raw: bool,
    },

    /// Re-run the pipeline with feedback, keeping the profile.
    Refine {
        /// What to change (e.g. "prefer universities under $20k").
        feedback: String,

        #[arg(long)]
        run: Option<String>,

        /// Reset the run without executing stages.
        #[arg(long)]
        no_run: bool,
    },

    /// Ask a follow-up question about a finished run.
    Ask {
        question: String,

        #[arg(long)]
        run: Option<String>,
    },

    /// Write the Markdown report of a run.
    Report {
        #[arg(long)]
        run: Option<String>,

        /// Output file (defaults to <reports_dir>/<run-id>.md).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List stored runs.
    List,

    /// Delete a run and its results.
    Delete {
        run: String,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "smartadmit=info",
        1 => "smartadmit=debug",
        _ => "smartadmit=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolved global options shared by every command.
struct Context {
    config: AppConfig,
    db_path: PathBuf,
    openrouter_key: Option<String>,
    serper_key: Option<String>,
}

impl Context {
    fn credentials(&self) -> Result<Credentials> {
        Ok(resolve_credentials(
            &self.config,
            self.openrouter_key.as_deref(),
            self.serper_key.as_deref(),
        )?)
    }

    fn session(&self) -> Session {
        Session::new(
            Arc::new(ProviderFactory {
                config: self.config.clone(),
            }),
            ResearchSettings::from(&self.config.serper),
        )
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| expand_home(&config.defaults.database));
    let ctx = Context {
        config,
        db_path,
        openrouter_key: cli.openrouter_key,
        serper_key: cli.serper_key,
    };

    match cli.command {
        Command::Start {
            text,
            file,
            document,
            interactive,
            no_run,
        } => {
            cmd_start(
                &ctx,
                text,
                file.as_deref(),
                document.as_deref(),
                interactive,
                no_run,
            )
            .await
        }
        Command::Advance { run } => cmd_advance(&ctx, run.as_deref(), true).await,
        Command::Resume { run } => cmd_advance(&ctx, run.as_deref(), false).await,
        Command::Status { run } => cmd_status(&ctx, run.as_deref()).await,
        Command::Show { run, stage, raw } => {
            cmd_show(&ctx, run.as_deref(), stage.as_deref(), raw).await
        }
        Command::Refine {
            feedback,
            run,
            no_run,
        } => cmd_refine(&ctx, run.as_deref(), &feedback, no_run).await,
        Command::Ask { question, run } => cmd_ask(&ctx, run.as_deref(), &question).await,
        Command::Report { run, out } => cmd_report(&ctx, run.as_deref(), out.as_deref()).await,
        Command::List => cmd_list(&ctx).await,
        Command::Delete { run } => cmd_delete(&ctx, &run).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&ctx),
        },
    }
}

// ---------------------------------------------------------------------------
// Provider wiring
// ---------------------------------------------------------------------------

/// Builds the real OpenRouter/Serper/page-fetch clients.
struct ProviderFactory {
    config: AppConfig,
}

impl ClientFactory for ProviderFactory {
    fn connect(&self, credentials: &Credentials) -> smartadmit_shared::Result<PipelineClients> {
        let reasoning = OpenRouterClient::new(&self.config.openrouter, credentials)?;
        let search = SerperSearch::new(&self.config.serper, credentials)?;
        let fetch = PageFetcher::new()?;
        Ok(PipelineClients {
            reasoning: Arc::new(reasoning),
            search: Arc::new(search),
            fetch: Some(Arc::new(fetch)),
        })
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_start(
    ctx: &Context,
    text: Option<String>,
    file: Option<&Path>,
    document: Option<&Path>,
    interactive: bool,
    no_run: bool,
) -> Result<()> {
    // Credentials first: nothing runs without both keys
    let credentials = ctx.credentials()?;
    let mut session = ctx.session();
    session.set_credentials(&credentials)?;

    let text = read_profile_text(text, file)?;
    if text.trim().is_empty() {
        return Err(eyre!("profile text is empty"));
    }

    let extractor = OpenRouterClient::extractor(&ctx.config.openrouter, &credentials)?;
    let intake = Intake::new()
        .with_documents(Arc::new(PdfDocumentExtractor::new(&ctx.config.document)))
        .with_model(Arc::new(extractor));

    let spinner = spinner("Reading profile");
    let outcome = intake.run(&text, document).await;
    spinner.finish_and_clear();

    for warning in &outcome.warnings {
        eprintln!("  warning: {warning}");
    }
    let mut profile = outcome.profile;

    if interactive {
        let questions = follow_up_questions(&profile);
        if !questions.is_empty() {
            println!("A few more details help the search (press Enter to skip):");
        }
        for (field, question) in questions {
            let answer = prompt_line(question)?;
            apply_answer(&mut profile, field, &answer);
        }
    }

    session.submit_profile(profile)?;
    let run_id = session.state().run_id;

    let storage = Storage::open(&ctx.db_path).await?;
    if let Some(profile) = session.profile() {
        storage.insert_run(&run_id, profile).await?;
    }
    info!(%run_id, "run created");

    println!();
    println!("  Run:     {run_id}");
    if let Some(profile) = session.profile() {
        let missing = profile.missing_fields();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|f| f.label()).collect();
            println!("  Missing: {}", names.join(", "));
        }
    }
    println!();

    if no_run {
        println!("  Run `smartadmit advance` or `smartadmit resume` to continue.");
        return Ok(());
    }

    drive(&mut session, &storage, false).await?;
    print_completion(&session);
    Ok(())
}

async fn cmd_advance(ctx: &Context, run: Option<&str>, once: bool) -> Result<()> {
    let credentials = ctx.credentials()?;
    let storage = Storage::open(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let mut session = restore_session(ctx, &storage, &credentials, run_id).await?;

    drive(&mut session, &storage, once).await?;
    print_completion(&session);
    Ok(())
}

async fn cmd_status(ctx: &Context, run: Option<&str>) -> Result<()> {
    let storage = Storage::open_readonly(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let stored = storage
        .load_run(&run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;
    let results = storage.load_stage_results(&run_id).await?;
    let state = RunState::from_parts(run_id, results, stored.last_failure.clone());

    let pending = AdmissionStage::ALL
        .into_iter()
        .find(|s| !state.is_completed(s.key()));
    let done = AdmissionStage::ALL
        .iter()
        .filter(|s| state.is_completed(s.key()))
        .count();

    println!();
    println!("  Run:     {run_id}");
    println!(
        "  Student: {}",
        stored.profile.display(ProfileField::StudentName)
    );
    match pending {
        Some(stage) => println!(
            "  Phase:   {} ({done}/{} complete)",
            stage.activity(),
            AdmissionStage::ALL.len()
        ),
        None => println!("  Phase:   results ready"),
    }
    println!("  Updated: {}", stored.updated_at.format("%Y-%m-%d %H:%M UTC"));
    println!();

    for stage in AdmissionStage::ALL {
        let line = match state.result(stage.key()) {
            Some(result) => format!(
                "✓ {:<20} {:<10} {}",
                stage.key(),
                result.reconciled.shape(),
                result.model
            ),
            None => match state.last_failure() {
                Some(failure) if failure.stage == stage.key() => {
                    format!("✗ {:<20} {}", stage.key(), failure.cause)
                }
                _ => format!("· {}", stage.key()),
            },
        };
        println!("  {line}");
    }
    println!();
    Ok(())
}

async fn cmd_show(ctx: &Context, run: Option<&str>, stage: Option<&str>, raw: bool) -> Result<()> {
    if let Some(key) = stage {
        if AdmissionStage::from_key(key).is_none() {
            let keys: Vec<&str> = AdmissionStage::ALL.iter().map(|s| s.key()).collect();
            return Err(eyre!("unknown stage '{key}': expected one of {}", keys.join(", ")));
        }
    }

    let storage = Storage::open_readonly(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let results = storage.load_stage_results(&run_id).await?;

    let selected: Vec<&StageResult> = results
        .iter()
        .filter(|r| stage.is_none_or(|key| r.stage == key))
        .collect();
    if selected.is_empty() {
        println!("No stage results stored yet.");
        return Ok(());
    }

    for result in selected {
        let title = AdmissionStage::from_key(&result.stage)
            .map(|s| s.title())
            .unwrap_or(result.stage.as_str());
        println!("== {title} ==");
        if raw {
            println!("{}", result.raw);
        } else {
            println!("{}", reconciled_for_display(&result.reconciled)?);
        }
        println!();
    }
    Ok(())
}

async fn cmd_refine(ctx: &Context, run: Option<&str>, feedback: &str, no_run: bool) -> Result<()> {
    let credentials = ctx.credentials()?;
    let storage = Storage::open(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let mut session = restore_session(ctx, &storage, &credentials, run_id).await?;

    session.refine(feedback)?;
    if let Some(profile) = session.profile() {
        storage.reset_for_refinement(&run_id, profile).await?;
    }
    info!(%run_id, "run reset for refinement");

    if no_run {
        println!("Run {run_id} reset with your feedback.");
        return Ok(());
    }

    drive(&mut session, &storage, false).await?;
    print_completion(&session);
    Ok(())
}

async fn cmd_ask(ctx: &Context, run: Option<&str>, question: &str) -> Result<()> {
    let credentials = ctx.credentials()?;
    let storage = Storage::open(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let mut session = restore_session(ctx, &storage, &credentials, run_id).await?;

    let spinner = spinner("Researching your question");
    let answer = session.ask(question).await;
    spinner.finish_and_clear();
    let exchange = answer?;

    storage.append_qa(&run_id, &exchange).await?;
    println!("{}", exchange.answer);
    Ok(())
}

async fn cmd_report(ctx: &Context, run: Option<&str>, out: Option<&Path>) -> Result<()> {
    let storage = Storage::open_readonly(&ctx.db_path).await?;
    let run_id = resolve_run(&storage, run).await?;
    let stored = storage
        .load_run(&run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;
    let results = storage.load_stage_results(&run_id).await?;
    let qa = storage.list_qa(&run_id).await?;

    let report = render_report(&stored.profile, &results, &qa, Utc::now());

    let path = match out {
        Some(p) => p.to_path_buf(),
        None => expand_home(&ctx.config.defaults.reports_dir).join(format!("{run_id}.md")),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SmartAdmitError::io(parent, e))?;
    }
    std::fs::write(&path, report).map_err(|e| SmartAdmitError::io(&path, e))?;

    println!("Report written to {}", path.display());
    Ok(())
}

async fn cmd_list(ctx: &Context) -> Result<()> {
    if !ctx.db_path.exists() {
        println!("No runs yet. Start one with `smartadmit start`.");
        return Ok(());
    }
    let storage = Storage::open_readonly(&ctx.db_path).await?;
    let runs = storage.list_runs().await?;
    if runs.is_empty() {
        println!("No runs yet. Start one with `smartadmit start`.");
        return Ok(());
    }

    for run in runs {
        let status = match (&run.failed_stage, run.completed_stages) {
            (Some(stage), _) => format!("failed at {stage}"),
            (None, n) if n as usize >= AdmissionStage::ALL.len() => "complete".to_string(),
            (None, n) => format!("{n}/{} stages", AdmissionStage::ALL.len()),
        };
        println!(
            "{}  {}  {:<24} {status}",
            run.id,
            run.updated_at.format("%Y-%m-%d %H:%M"),
            run.student_name.as_deref().unwrap_or("(unnamed)"),
        );
    }
    Ok(())
}

async fn cmd_delete(ctx: &Context, run: &str) -> Result<()> {
    let run_id: RunId = run.parse().map_err(|e| eyre!("invalid run id '{run}': {e}"))?;
    let storage = Storage::open(&ctx.db_path).await?;
    if storage.delete_run(&run_id).await? {
        println!("Deleted run {run_id}");
        Ok(())
    } else {
        Err(eyre!("run {run_id} not found"))
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Advance the session, persisting every completed stage and any failure.
async fn drive(session: &mut Session, storage: &Storage, once: bool) -> Result<()> {
    let run_id = session.state().run_id;
    let progress = CliProgress::new();

    loop {
        match session.advance(&progress).await {
            Ok(Advance::Executed(stage)) => {
                let position = AdmissionStage::ALL
                    .iter()
                    .position(|s| s.key() == stage)
                    .unwrap_or(AdmissionStage::ALL.len()) as u32;
                if let Some(result) = session.state().result(&stage) {
                    storage.save_stage_result(&run_id, position, result).await?;
                }
                storage.record_failure(&run_id, None).await?;
                if once {
                    break;
                }
            }
            Ok(Advance::Complete) => break,
            Err(e) => {
                progress.finish();
                storage
                    .record_failure(&run_id, session.state().last_failure())
                    .await?;
                warn!(%run_id, error = %e, "run halted; retry with `smartadmit advance`");
                return Err(e.into());
            }
        }
    }

    progress.finish();
    Ok(())
}

async fn resolve_run(storage: &Storage, run: Option<&str>) -> Result<RunId> {
    match run {
        Some(id) => id.parse().map_err(|e| eyre!("invalid run id '{id}': {e}")),
        None => storage
            .latest_run_id()
            .await?
            .ok_or_else(|| eyre!("no runs yet; start one with `smartadmit start`")),
    }
}

async fn restore_session(
    ctx: &Context,
    storage: &Storage,
    credentials: &Credentials,
    run_id: RunId,
) -> Result<Session> {
    let stored = storage
        .load_run(&run_id)
        .await?
        .ok_or_else(|| eyre!("run {run_id} not found"))?;
    let results = storage.load_stage_results(&run_id).await?;
    let qa = storage.list_qa(&run_id).await?;

    let mut session = ctx.session();
    session.set_credentials(credentials)?;
    session.restore(
        stored.profile,
        RunState::from_parts(run_id, results, stored.last_failure),
        qa,
    )?;
    Ok(session)
}

fn read_profile_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return Ok(std::fs::read_to_string(path).map_err(|e| SmartAdmitError::io(path, e))?);
    }
    eprintln!("Describe yourself (academics, scores, goals, budget, countries); end with Ctrl-D:");
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn prompt_line(question: &str) -> Result<String> {
    print!("  {question} ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn reconciled_for_display(reconciled: &Reconciled) -> Result<String> {
    Ok(match reconciled {
        Reconciled::Records(records) => serde_json::to_string_pretty(records)?,
        Reconciled::Record(record) => serde_json::to_string_pretty(record)?,
        Reconciled::Narrative(text) => text.clone(),
        Reconciled::NoResults(sentinel) => format!("{sentinel}."),
    })
}

fn print_completion(session: &Session) {
    let run_id = session.state().run_id;
    println!();
    println!("  Phase: {}", session.phase());
    println!("  Next:  smartadmit report --run {run_id}");
    println!("         smartadmit ask --run {run_id} \"<question>\"");
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(message.to_string());
    spinner
}

/// Stage progress on an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: spinner("Starting"),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl StageProgress for CliProgress {
    fn stage_started(&self, stage: &str, position: usize, total: usize) {
        let activity = AdmissionStage::from_key(stage)
            .map(|s| s.activity())
            .unwrap_or(stage);
        self.spinner
            .set_message(format!("[{}/{total}] {activity}", position + 1));
    }

    fn research(&self, _stage: &str, query: &str) {
        self.spinner.set_message(format!("Searching: {query}"));
    }

    fn stage_completed(&self, result: &StageResult) {
        let title = AdmissionStage::from_key(&result.stage)
            .map(|s| s.title())
            .unwrap_or(result.stage.as_str());
        self.spinner
            .println(format!("  ✓ {title} ({})", result.reconciled.shape()));
    }

    fn stage_failed(&self, stage: &str, error: &SmartAdmitError) {
        self.spinner.println(format!("  ✗ {stage}: {error}"));
    }
}
