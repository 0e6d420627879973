use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use puterchat_core_sdk::{
    chat::{ChatController, IgnoreReason, SendOutcome},
    credential::CredentialStore,
    db,
    llm::PuterClient,
    selector::Model,
    server, telemetry,
};

/**
 * \brief Terminal front end for the hosted chat completion API.
 */
#[derive(Parser, Debug)]
#[command(name = "puterchat", version, about = "Chat with hosted models from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Show whether an auth token is configured, or save a new one.
     */
    Token {
        #[arg(long)]
        set: Option<String>,
    },

    /**
     * \brief List the selectable models.
     */
    Models,

    /**
     * \brief Send a single message and print the reply.
     */
    Ask {
        #[arg(long)]
        prompt: String,
        #[arg(long, default_value_t = Model::default())]
        model: Model,
    },

    /**
     * \brief Interactive chat session on stdin.
     */
    Chat {
        #[arg(long, default_value_t = Model::default())]
        model: Model,
    },

    /**
     * \brief Persist the telemetry switch.
     */
    Telemetry {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /**
     * \brief Start the local HTTP surface for a browser front end.
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5174")]
        addr: String,
        #[arg(long, default_value_t = Model::default())]
        model: Model,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Serve { addr, model } = &cli.command {
        return server::run(addr, *model).await;
    }

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Token { set } => {
            let mut store = CredentialStore::load(conn).context("load credential failed")?;
            match set {
                Some(token) => {
                    save_checked(&mut store, &token)?;
                    println!("Auth token saved.");
                }
                None if store.is_set() => println!("Auth token is configured."),
                None => println!("No auth token configured. Run: puterchat token --set <TOKEN>"),
            }
        }
        Commands::Models => {
            for model in Model::all() {
                let marker = if *model == Model::default() { " (default)" } else { "" };
                println!("{:<26} {}{}", model.as_str(), model.label(), marker);
            }
        }
        Commands::Telemetry { enabled } => {
            db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
            println!("Telemetry {}", if enabled { "enabled" } else { "disabled" });
        }
        Commands::Ask { prompt, model } => {
            let store = CredentialStore::load(conn).context("load credential failed")?;
            let controller = ChatController::with_model(store, PuterClient::from_env(), model);
            let outcome = controller.send(&prompt).await?;
            match ask_reply(&outcome)? {
                Some(reply) => println!("{}", reply),
                None => eprintln!("Nothing to send."),
            }
        }
        Commands::Chat { model } => {
            let store = CredentialStore::load(conn).context("load credential failed")?;
            let controller = ChatController::with_model(store, PuterClient::from_env(), model);
            run_interactive(&controller).await?;
        }
        Commands::Serve { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_interactive(controller: &ChatController<PuterClient>) -> Result<()> {
    println!(
        "Using {} via Puter API. Commands: /model [id], /models, /token, /quit",
        controller.model()?
    );
    if !controller.has_credential()? {
        println!("Configure your Puter auth token to begin chatting (/token).");
    }

    while let Some(raw) = read_line("you> ")? {
        let line = match parse_input(&raw) {
            ReplInput::Quit => break,
            ReplInput::Models => {
                for model in Model::all() {
                    println!("  {:<26} {}", model.as_str(), model.label());
                }
                continue;
            }
            ReplInput::Token => {
                prompt_token(controller)?;
                continue;
            }
            ReplInput::ShowModel => {
                let model = controller.model()?;
                println!("Using {} ({})", model.label(), model.as_str());
                continue;
            }
            ReplInput::SwitchModel(id) => {
                match id.parse::<Model>() {
                    Ok(model) => {
                        controller.set_model(model)?;
                        println!("Using {}", model.label());
                    }
                    Err(e) => println!("{}", e),
                }
                continue;
            }
            ReplInput::Unknown(cmd) => {
                println!("Unknown command {}. Commands: /model [id], /models, /token, /quit", cmd);
                continue;
            }
            ReplInput::Chat(text) => text,
        };

        let mut outcome = controller.send(line).await?;
        if outcome == SendOutcome::ConfigurationRequired {
            if !prompt_token(controller)? {
                continue;
            }
            outcome = controller.send(line).await?;
        }
        match outcome {
            SendOutcome::Replied(msg) | SendOutcome::Failed(msg) => {
                println!("assistant> {}", msg.content)
            }
            SendOutcome::Ignored(IgnoreReason::Busy) => println!("Still waiting for a reply."),
            SendOutcome::Ignored(IgnoreReason::Empty) | SendOutcome::ConfigurationRequired => {}
        }
    }
    Ok(())
}

/**
 * \brief Reply text for a one-shot `ask`, or the failure as an error.
 * \details The transcript entry already reads `Error: <reason>`, and anyhow's
 * report from `main` adds that prefix again, so only the reason is kept.
 */
fn ask_reply(outcome: &SendOutcome) -> Result<Option<&str>> {
    match outcome {
        SendOutcome::Replied(msg) => Ok(Some(msg.content.as_str())),
        SendOutcome::Failed(msg) => {
            let reason = msg.content.strip_prefix("Error: ").unwrap_or(&msg.content);
            anyhow::bail!("{}", reason)
        }
        SendOutcome::Ignored(_) => Ok(None),
        SendOutcome::ConfigurationRequired => {
            anyhow::bail!("no auth token, run: puterchat token --set <TOKEN>")
        }
    }
}

/**
 * \brief One line typed into the interactive session.
 */
#[derive(Debug, PartialEq, Eq)]
enum ReplInput<'a> {
    Quit,
    Models,
    Token,
    ShowModel,
    SwitchModel(&'a str),
    Unknown(&'a str),
    Chat(&'a str),
}

/**
 * \brief Lines starting with `/` are handled locally and never sent as chat text.
 */
fn parse_input(raw: &str) -> ReplInput<'_> {
    let line = raw.trim();
    let Some(command) = line.strip_prefix('/') else {
        return ReplInput::Chat(line);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "exit" => ReplInput::Quit,
        "models" => ReplInput::Models,
        "token" => ReplInput::Token,
        "model" if arg.is_empty() => ReplInput::ShowModel,
        "model" => ReplInput::SwitchModel(arg),
        _ => ReplInput::Unknown(line),
    }
}

/**
 * \brief Ask for a token on stdin; returns false when the user left it blank.
 */
fn prompt_token(controller: &ChatController<PuterClient>) -> Result<bool> {
    println!("Get your token at https://puter.com: sign in, open DevTools, run `puter.authToken`.");
    let line = read_line("auth token> ")?.unwrap_or_default();
    let token = line.trim_end_matches(['\r', '\n']);
    if token.trim().is_empty() {
        println!("No token entered.");
        return Ok(false);
    }
    controller.save_token(token).context("save token failed")?;
    println!("Auth token saved.");
    Ok(true)
}

fn save_checked(store: &mut CredentialStore, token: &str) -> Result<()> {
    if token.trim().is_empty() {
        anyhow::bail!("token must not be empty");
    }
    store.save(token).context("save token failed")
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let mut buf = String::new();
    if io::stdin().read_line(&mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(buf))
}
