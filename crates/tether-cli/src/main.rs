//! Tether CLI
//!
//! Usage:
//!   tether exec sb-123 -- ls -la /tmp     Run a command inside a sandbox
//!   tether call my-app square --args '[4]' Call a function and print its result
//!   tether spawn my-app train              Start a function call, print its id
//!   tether get fc-456 --timeout 30         Collect a spawned call's result
//!   tether cat sb-123 /etc/hostname        Print a sandbox file
//!   tether put sb-123 /tmp/data.bin ./data.bin

use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tether::{
    CancellationToken, Client, ClientConfig, ExecOptions, GetOptions, OutputStream, StdinWriter,
    Stdio, Value,
};

/// Stdin is forwarded in pieces of at most this size.
const STDIN_CHUNK: usize = 64 * 1024;

/// Tether - drive remote functions and sandboxes
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Invoke remote functions and run processes in remote sandboxes")]
struct Cli {
    /// Log client activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured server URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command inside a sandbox, streaming its stdio
    Exec {
        sandbox_id: String,
        /// Working directory inside the sandbox
        #[arg(long)]
        workdir: Option<String>,
        /// Kill the command after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Run under a pseudo-terminal
        #[arg(long)]
        pty: bool,
        /// Discard the command's stdout
        #[arg(long)]
        no_stdout: bool,
        /// Discard the command's stderr
        #[arg(long)]
        no_stderr: bool,
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Call a function and print its JSON result
    Call(CallArgs),
    /// Start a function call and print its id
    Spawn(CallArgs),
    /// Wait for a spawned call and print its JSON result
    Get {
        function_call_id: String,
        /// Give up after this many seconds; 0 checks once
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Cancel a spawned call
    Cancel {
        function_call_id: String,
        /// Also stop the containers running it
        #[arg(long)]
        terminate_containers: bool,
    },
    /// Print a file from a sandbox
    Cat { sandbox_id: String, path: String },
    /// Upload a local file (or stdin with `-`) into a sandbox
    Put {
        sandbox_id: String,
        path: String,
        #[arg(default_value = "-")]
        source: String,
        /// Append instead of truncating
        #[arg(long)]
        append: bool,
    },
    /// Wait for a sandbox to finish and exit with its code
    Wait { sandbox_id: String },
    /// Terminate a sandbox
    Terminate { sandbox_id: String },
}

#[derive(Args, Debug)]
struct CallArgs {
    app_name: String,
    function_name: String,
    /// Environment to look the function up in
    #[arg(long)]
    env: Option<String>,
    /// Positional arguments as a JSON array
    #[arg(long, default_value = "[]")]
    args: String,
    /// Keyword arguments as a JSON object
    #[arg(long, default_value = "{}")]
    kwargs: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "warn,tether=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let mut config = ClientConfig::load().context("loading configuration")?;
    if let Some(url) = cli.server_url {
        config = config.with_server_url(url);
    }
    debug!(?config, "resolved configuration");
    let client = Client::connect(config).await?;

    // Ctrl-C abandons whatever we are waiting on.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    match cli.command {
        Command::Exec {
            sandbox_id,
            workdir,
            timeout,
            pty,
            no_stdout,
            no_stderr,
            command,
        } => {
            let options = ExecOptions {
                stdout: if no_stdout { Stdio::Ignore } else { Stdio::Pipe },
                stderr: if no_stderr { Stdio::Ignore } else { Stdio::Pipe },
                workdir,
                timeout: timeout.map(Duration::from_secs),
                pty,
                ..Default::default()
            };
            let code = exec(&client, &sandbox_id, command, options, &cancel).await?;
            // A read parked on local stdin cannot be cancelled and would hold
            // the runtime open on drop.
            std::process::exit(code)
        }
        Command::Call(args) => {
            let function = client
                .function_from_name(&args.app_name, &args.function_name, args.env.as_deref())
                .await?;
            let (positional, keyword) = parse_arguments(&args.args, &args.kwargs)?;
            let value = function.remote(&positional, &keyword, &cancel).await?;
            print_value(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Spawn(args) => {
            let function = client
                .function_from_name(&args.app_name, &args.function_name, args.env.as_deref())
                .await?;
            let (positional, keyword) = parse_arguments(&args.args, &args.kwargs)?;
            let call = function.spawn(&positional, &keyword).await?;
            println!("{}", call.id());
            Ok(ExitCode::SUCCESS)
        }
        Command::Get {
            function_call_id,
            timeout,
        } => {
            let options = match timeout {
                Some(secs) if secs.is_finite() && secs >= 0.0 => {
                    GetOptions::timeout(Duration::from_secs_f64(secs))
                }
                Some(secs) => bail!("invalid timeout {secs}"),
                None => GetOptions::default(),
            };
            let value = client
                .function_call_from_id(function_call_id)
                .get(options, &cancel)
                .await?;
            print_value(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel {
            function_call_id,
            terminate_containers,
        } => {
            client
                .function_call_from_id(function_call_id)
                .cancel(terminate_containers)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cat { sandbox_id, path } => {
            let sandbox = client.sandbox_from_id(&sandbox_id).await?;
            let mut file = sandbox.open(&path, "rb").await?;
            let data = file.read(None).await?;
            file.close().await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Put {
            sandbox_id,
            path,
            source,
            append,
        } => {
            let data = if source == "-" {
                read_all(tokio::io::stdin()).await?
            } else {
                tokio::fs::read(&source)
                    .await
                    .with_context(|| format!("reading {source}"))?
            };
            let sandbox = client.sandbox_from_id(&sandbox_id).await?;
            let mut file = sandbox.open(&path, if append { "ab" } else { "wb" }).await?;
            file.write(&data).await?;
            file.flush().await?;
            file.close().await?;
            debug!(path, bytes = data.len(), "uploaded");
            Ok(ExitCode::SUCCESS)
        }
        Command::Wait { sandbox_id } => {
            let sandbox = client.sandbox_from_id(&sandbox_id).await?;
            let code = sandbox.wait(&cancel).await?;
            Ok(exit_code(code))
        }
        Command::Terminate { sandbox_id } => {
            client.sandbox_from_id(&sandbox_id).await?.terminate().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn exec(
    client: &Client,
    sandbox_id: &str,
    command: Vec<String>,
    options: ExecOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let sandbox = client.sandbox_from_id(sandbox_id).await?;
    let mut process = sandbox.exec(command, options).await?;
    debug!(exec_id = process.exec_id(), "started");

    {
        let (stdout, stderr) = (&mut process.stdout, &mut process.stderr);
        let forward = forward_stdin(&mut process.stdin);
        let drain = async move {
            tokio::try_join!(
                pipe(stdout, tokio::io::stdout(), cancel),
                pipe(stderr, tokio::io::stderr(), cancel),
            )
        };
        tokio::pin!(forward, drain);

        // Output can finish while local stdin is still open; stop forwarding then.
        let mut forwarding = true;
        loop {
            tokio::select! {
                result = &mut forward, if forwarding => {
                    result?;
                    forwarding = false;
                }
                result = &mut drain => {
                    result?;
                    break;
                }
            }
        }
    }

    Ok(process.wait(cancel).await?)
}

async fn forward_stdin(stdin: &mut StdinWriter) -> anyhow::Result<()> {
    let mut input = tokio::io::stdin();
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdin.write(&buf[..n]).await?;
    }
    stdin.close().await?;
    Ok(())
}

async fn pipe(
    stream: &mut OutputStream,
    mut out: impl AsyncWrite + Unpin,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    while let Some(chunk) = stream.next_chunk(cancel).await? {
        out.write_all(&chunk).await?;
        out.flush().await?;
    }
    Ok(())
}

async fn read_all(mut input: impl AsyncRead + Unpin) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    input.read_to_end(&mut data).await?;
    Ok(data)
}

fn parse_arguments(
    args: &str,
    kwargs: &str,
) -> anyhow::Result<(Vec<Value>, BTreeMap<String, Value>)> {
    let args: Vec<serde_json::Value> =
        serde_json::from_str(args).context("--args must be a JSON array")?;
    let kwargs: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(kwargs).context("--kwargs must be a JSON object")?;

    let args = args
        .iter()
        .map(Value::serialized)
        .collect::<Result<Vec<_>, _>>()?;
    let kwargs = kwargs
        .iter()
        .map(|(name, value)| Ok((name.clone(), Value::serialized(value)?)))
        .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
    Ok((args, kwargs))
}

fn print_value(value: &Value) -> anyhow::Result<()> {
    let json: serde_json::Value = value
        .deserialized()
        .context("result cannot be shown as JSON")?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
