use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use panel_core::{
    config::{Config, ModelSource},
    credential::{ApiKey, KeyStore},
    http_client::HttpClient,
    model::{
        ChatMessage, ChatRequest, CodeCheckRequest, ProblemAnalysisRequest,
        StudentCodeAnalysisRequest,
    },
    panels::{AnalysisClient, ChatClient, ChatSurface, Conversation, EmbeddingClient, HttpChatTransport, TtsClient},
    session::{Session, SessionEvent},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "LLM panels: chat, embeddings, TTS and code analysis", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// API key for this run; overrides the stored key
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with a model. Without MESSAGE, reads one message per line from stdin.
    Chat {
        #[arg(long, help = "Model source: sdu or vllm")]
        source: Option<ModelSource>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, help = "Wait for the full reply instead of streaming it")]
        no_stream: bool,
        message: Option<String>,
    },
    /// Print the embedding vector of TEXT
    Embed { text: String },
    /// Synthesize TEXT to an audio file
    Tts {
        text: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Review a source file
    CodeCheck {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Analyze a problem statement
    ProblemAnalysis {
        #[arg(long)]
        code: String,
        #[arg(long, help = "File holding the problem description")]
        description: PathBuf,
    },
    /// Analyze a student's submission against a problem
    StudentAnalysis {
        #[arg(long)]
        problem_id: String,
        #[arg(long, help = "File holding the student's code")]
        code: PathBuf,
        #[arg(long, help = "File holding the problem description")]
        description: PathBuf,
    },
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    Set { value: String },
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides()?;
    tracing::debug!(source = ?cfg.endpoints.default_source, "config loaded");

    let store = KeyStore::from_config(&cfg.key_store);
    let key = match cli.api_key.as_deref() {
        Some(raw) => ApiKey::parse(raw),
        None => store.load()?,
    };
    let http = HttpClient::new(&cfg.http)?;

    match cli.command {
        Commands::Chat {
            source,
            model,
            no_stream,
            message,
        } => {
            let source = source.unwrap_or(cfg.endpoints.default_source);
            let model = model.unwrap_or_else(|| cfg.chat.model_for(source).to_string());
            let stream = cfg.chat.stream && !no_stream;
            let transport = HttpChatTransport::from_config(http, &cfg, source, key);
            let mut chat = ChatPanel {
                surface: ChatSurface::new(ChatClient::new(Arc::new(transport))),
                conversation: Conversation::new(),
                model,
                stream,
            };
            match message {
                Some(text) => chat.ask(text).await?,
                None => chat.interactive().await?,
            }
        }
        Commands::Embed { text } => {
            let client = EmbeddingClient::from_config(http, &cfg, key);
            let emb = client.embed(&text).await?;
            let preview: Vec<String> = emb.preview(8).iter().map(|v| format!("{v:.4}")).collect();
            println!("dims: {}", emb.dims());
            println!("[{}{}]", preview.join(", "), if emb.dims() > 8 { ", ..." } else { "" });
        }
        Commands::Tts { text, out } => {
            let client = TtsClient::from_config(http, &cfg);
            let audio = client.synthesize(&text).await?;
            std::fs::write(&out, &audio.bytes).with_context(|| format!("writing {}", out.display()))?;
            println!(
                "wrote {} bytes ({}) to {}",
                audio.bytes.len(),
                audio.content_type.as_deref().unwrap_or("unknown type"),
                out.display()
            );
        }
        Commands::CodeCheck {
            file,
            language,
            model,
        } => {
            let mut req = CodeCheckRequest::new(read_file(&file)?);
            if let Some(l) = language {
                req.language = l;
            }
            if let Some(m) = model {
                req.model = m;
            }
            let resp = AnalysisClient::from_config(http, &cfg).code_check(&req).await?;
            print_status(&resp.status, resp.message.as_deref());
            println!("{}", resp.result);
        }
        Commands::ProblemAnalysis { code, description } => {
            let req = ProblemAnalysisRequest {
                problem_code: code,
                problem_description: read_file(&description)?,
            };
            let resp = AnalysisClient::from_config(http, &cfg).problem_analysis(&req).await?;
            print_status(&resp.status, resp.message.as_deref());
            let r = &resp.result;
            section("Problem", &r.problem_code);
            section("Simplified description", &r.simplified_description);
            section("Edge cases", &r.edge_cases);
            section("Possible errors", &r.possible_errors);
            if !r.solutions.is_empty() {
                section("Solutions", &serde_json::to_string_pretty(&r.solutions)?);
            }
            if let Some(code) = &r.std_code {
                section("Reference code", code);
            }
        }
        Commands::StudentAnalysis {
            problem_id,
            code,
            description,
        } => {
            let req = StudentCodeAnalysisRequest {
                problem_id,
                student_code: read_file(&code)?,
                problem_description: read_file(&description)?,
                submission_history: Vec::new(),
            };
            let resp = AnalysisClient::from_config(http, &cfg)
                .student_code_analysis(&req)
                .await?;
            print_status(&resp.status, resp.message.as_deref());
            let r = &resp.result;
            section("Verdict", &format!("{} {}", r.status, r.message));
            if let Some(v) = &r.analysis {
                section("Analysis", &serde_json::to_string_pretty(v)?);
            }
            if let Some(v) = &r.counter_example {
                section("Counter example", &serde_json::to_string_pretty(v)?);
            }
            if let Some(id) = &r.error_id {
                section("Error id", id);
            }
            if let Some(s) = &r.implementation_analysis {
                section("Implementation analysis", s);
            }
            if let Some(s) = &r.fix_suggestions {
                section("Fix suggestions", s);
            }
        }
        Commands::Key { action } => match action {
            KeyAction::Set { value } => {
                let saved = store.save(&value)?;
                match saved.key {
                    Some(k) => println!("saved {} to {}", mask(k.expose()), store.path().display()),
                    None => println!("key was empty after cleaning; removed {}", store.path().display()),
                }
                if saved.cleaned {
                    eprintln!("note: whitespace, quotes or non-ASCII characters were removed");
                }
            }
            KeyAction::Show => match store.load()? {
                Some(k) => println!("{}", mask(k.expose())),
                None => println!("no key stored"),
            },
            KeyAction::Clear => {
                store.clear()?;
                println!("cleared");
            }
        },
    }

    Ok(())
}

/// One chat panel bound to stdout.
struct ChatPanel {
    surface: ChatSurface,
    conversation: Conversation,
    model: String,
    stream: bool,
}

impl ChatPanel {
    async fn ask(&mut self, text: String) -> anyhow::Result<()> {
        let mut messages = self.conversation.history();
        messages.push(ChatMessage::user(text.clone()));
        let session = self.surface.start(ChatRequest {
            model: self.model.clone(),
            stream: self.stream,
            messages,
        })?;
        self.conversation.push_user(text);
        self.conversation.begin_reply();
        render(session, &mut self.conversation, &mut io::stdout(), ctrl_c).await
    }

    async fn interactive(&mut self) -> anyhow::Result<()> {
        eprintln!("model {}; Ctrl-C cancels a reply or quits at the prompt, Ctrl-D or /exit quits", self.model);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("> ");
            io::stderr().flush()?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                () = ctrl_c() => {
                    eprintln!();
                    // the stdin reader is parked on a blocking thread and would hold up runtime shutdown
                    std::process::exit(130);
                }
            };
            let Some(line) = line else {
                break;
            };
            let line = line.trim();
            if line == "/exit" {
                break;
            }
            if line.is_empty() {
                continue;
            }
            if let Err(e) = self.ask(line.to_string()).await {
                eprintln!("error: {e:#}");
            }
        }
        Ok(())
    }
}

/// Resolves on the next Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Print each snapshot's new suffix as it arrives. `interrupt` cancels the session when it resolves.
async fn render<W, F, Fut>(
    mut session: Session,
    conversation: &mut Conversation,
    out: &mut W,
    mut interrupt: F,
) -> anyhow::Result<()>
where
    W: Write,
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut shown = 0;
    let mut failure = None;
    loop {
        let ev = tokio::select! {
            ev = session.next() => ev,
            () = interrupt(), if !session.is_cancelled() => {
                session.cancel();
                continue;
            }
        };
        let Some(ev) = ev else {
            break;
        };
        conversation.apply(&ev);
        match ev {
            SessionEvent::Update(text) | SessionEvent::Complete(text) => {
                if let Some(suffix) = text.get(shown..) {
                    write!(out, "{suffix}")?;
                    out.flush()?;
                }
                shown = text.len();
            }
            SessionEvent::Failed(err) => failure = Some(err),
            SessionEvent::Cancelled => eprint!("\n[cancelled]"),
            _ => {}
        }
    }
    writeln!(out)?;

    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_status(status: &str, message: Option<&str>) {
    match message {
        Some(m) if !m.is_empty() => eprintln!("[{status}] {m}"),
        _ => eprintln!("[{status}]"),
    }
}

fn section(title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    println!("== {title} ==\n{body}\n");
}

fn mask(key: &str) -> String {
    let head: String = key.chars().take(4).collect();
    format!("{head}****")
}
