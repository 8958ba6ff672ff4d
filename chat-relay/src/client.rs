use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::cli::ClientArgs;

const PROMPT_BUFFER_SIZE: usize = 1024;
const READ_BUFFER_SIZE: usize = 4096;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    let mut stdin = BufReader::new(tokio::io::stdin());

    let name = send_name(&mut reader, &mut writer, &mut stdin).await?;
    write_stdout(
        format!(
            "Connected as '{name}'. Type messages and press Enter to send. Ctrl+C to quit.\n\n"
        )
        .as_bytes(),
    )
    .await?;

    run_client_loop(&mut reader, &mut writer, &mut stdin).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);
    Ok(stream.into_split())
}

/// Show the server's name prompt, read the answer from stdin and send it.
async fn send_name(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<Stdin>,
) -> Result<String> {
    let mut prompt = vec![0; PROMPT_BUFFER_SIZE];
    let read = reader.read(&mut prompt).await.context("failed to read prompt")?;
    if read == 0 {
        bail!("server closed the connection before prompting for a name");
    }
    write_stdout(&prompt[..read]).await?;

    let mut line = String::new();
    stdin.read_line(&mut line).await?;
    let name = line.trim_end().to_string();

    // An empty write would never reach the server, so a blank name is sent as
    // a bare newline and the server picks a default.
    let payload = if name.is_empty() { "\n" } else { name.as_str() };
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;

    Ok(name)
}

async fn run_client_loop(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<Stdin>,
) -> Result<()> {
    let mut buf = vec![0; READ_BUFFER_SIZE];
    let mut input = String::new();

    loop {
        select! {
            server_bytes = reader.read(&mut buf) => {
                if !handle_server_bytes(server_bytes, &buf).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                let keep_going = handle_stdin_input(bytes_read, &input, writer).await?;
                input.clear();
                if !keep_going {
                    write_stdout(b"\nDisconnecting...\n").await?;
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                write_stdout(b"\nDisconnecting...\n").await?;
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_bytes(read: io::Result<usize>, buf: &[u8]) -> Result<bool> {
    match read {
        Ok(0) => {
            write_stdout(b"\n[Disconnected from server]\n").await?;
            Ok(false)
        }
        Ok(n) => {
            write_stdout(&buf[..n]).await?;
            Ok(true)
        }
        Err(error) => {
            warn!(?error, "connection to server failed");
            write_stdout(b"\n[Connection lost]\n").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(bytes: &[u8]) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await?;
    stdout.flush().await
}
