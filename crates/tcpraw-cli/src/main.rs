//! tcpraw — command-line client for the tcpraw file relay.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use tcpraw_cli::{probe, serverlist, transfer};
use tcpraw_core::config::TcprawConfig;
use tcpraw_core::crypto::BlobKey;
use tcpraw_core::Code;

fn print_usage() {
    println!("Usage: tcpraw [--list-url <url>] <command>");
    println!();
    println!("Transfer");
    println!("  send <file>                     Upload; prints a six-digit code");
    println!("  send <file> --secure            Upload under a random 256-bit key");
    println!("                                  the server never sees");
    println!("  get <code>                      Download by code");
    println!("  get <code> --key <hex>          Download a secure blob");
    println!("  get <code> --out <dir>          Download into a directory");
    println!();
    println!("Diagnostics");
    println!("  bench [<server-id>]             ~10 s throughput test each way");
    println!();
    println!("Options:");
    println!("  --list-url <url>                Override the server-list URL");
    println!();
    println!("Examples:");
    println!("  tcpraw send holiday.tar");
    println!("  tcpraw send secrets.db --secure");
    println!("  tcpraw get 391204");
    println!("  tcpraw get 391204 --key 5c8c7d3c9eff6572... --out ~/Downloads");
    println!("  tcpraw bench 3");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = TcprawConfig::load()?.client;

    // Pull out options; what remains is the command.
    let mut list_url = config.list_url.clone();
    let mut out_dir = config.output_dir.clone();
    let mut key_hex: Option<String> = None;
    let mut secure = false;
    let mut remaining: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--list-url" => {
                i += 1;
                list_url = args.get(i).context("--list-url requires a value")?.clone();
            }
            "--out" => {
                i += 1;
                out_dir = PathBuf::from(args.get(i).context("--out requires a value")?);
            }
            "--key" => {
                i += 1;
                key_hex = Some(args.get(i).context("--key requires a value")?.clone());
            }
            "--secure" => secure = true,
            other => remaining.push(other.to_string()),
        }
        i += 1;
    }
    let remaining: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();

    match remaining.as_slice() {
        ["send", path] => {
            let path = PathBuf::from(*path);
            let list = serverlist::fetch(&list_url).await?;
            if secure {
                let outcome = transfer::secure_send(&path, &list).await?;
                println!("code: {} (valid 1 hour)", outcome.code);
                println!("key:  {}", outcome.key.to_hex());
            } else {
                let outcome = transfer::send(&path, &list).await?;
                println!("code: {} (valid 1 hour)", outcome.code);
                println!("checksum: {}", hex::encode(outcome.checksum));
            }
        }

        ["get", code] => {
            let code: Code = code.parse()?;
            let list = serverlist::fetch(&list_url).await?;
            let key = key_hex.as_deref().map(BlobKey::from_hex).transpose()?;

            let path = match transfer::get(code, key, &list, &out_dir).await {
                Ok(path) => path,
                Err(e) if e.downcast_ref::<transfer::KeyRequired>().is_some() => {
                    let key = prompt_key()?;
                    transfer::get(code, Some(key), &list, &out_dir).await?
                }
                Err(e) => return Err(e),
            };
            println!("Downloaded: {}", path.display());
        }

        ["bench"] | ["bench", _] => {
            let list = serverlist::fetch(&list_url).await?;
            let addr = match remaining.get(1) {
                Some(id) => {
                    let id: usize = id.parse().context("server id must be 0–9")?;
                    let entry = list
                        .get(id)
                        .and_then(|e| e.as_ref())
                        .with_context(|| format!("no server listed for id {id}"))?;
                    entry.addr.clone()
                }
                None => {
                    let results = probe::probe_all(&list, 0).await;
                    probe::select_best(results)
                        .context("no server available")?
                        .addr
                }
            };
            println!("benching {addr} (~10 s each way)...");
            let summary = transfer::bench(&addr).await?;
            println!("download: {:.1} MB/s", summary.download_bps / 1e6);
            println!("upload:   {:.1} MB/s", summary.upload_bps / 1e6);
        }

        [] | ["help"] => print_usage(),

        other => {
            print_usage();
            bail!("unknown command: {:?}", other);
        }
    }

    Ok(())
}

/// Ask for the 64-hex-character key on stdin.
fn prompt_key() -> Result<BlobKey> {
    print!("key: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read key")?;
    BlobKey::from_hex(&line).map_err(Into::into)
}
