//! Connect to a Yamaha RTX router and print a few status commands.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example show_status -- --host 192.168.100.1 --user admin --password login-pass
//! ```
//!
//! Pass `--admin-password` to run the commands in administrator mode, and
//! `--save` to write the configuration to flash before disconnecting.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use rtxsh::{ClientBuilder, Context, PoolConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG=debug for session and pool events
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = ClientBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .connect_timeout(Duration::from_secs(args.timeout))
        .pool_config(PoolConfig {
            max_sessions: 1,
            ..PoolConfig::default()
        });

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }
    if let Some(admin) = &args.admin_password {
        builder = builder.administrator_password(admin);
    }

    let client = builder.build()?;
    let ctx = Context::with_timeout(Duration::from_secs(args.timeout * 4));

    for command in ["show environment", "show status dhcp", "show ip route"] {
        println!("\n{}", command);
        println!("{}", "-".repeat(50));
        match client.run(&ctx, command).await {
            Ok(result) => {
                println!("{}", result.cleaned());
                println!("({:?})", result.elapsed);
            }
            Err(e) => eprintln!("failed: {}", e),
        }
    }

    if args.save {
        client.save_config(&ctx).await?;
        println!("\nConfiguration saved");
    }

    client.log_stats();
    client.close().await;
    Ok(())
}

struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    admin_password: Option<String>,
    save: bool,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Args {
            host: "192.168.100.1".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "admin".to_string()),
            password: None,
            key: None,
            admin_password: None,
            save: false,
            timeout: 30,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--host" | "-h" => {
                    parsed.host = value.unwrap_or(parsed.host);
                    i += 1;
                }
                "--port" | "-p" => {
                    parsed.port = value.and_then(|v| v.parse().ok()).unwrap_or(22);
                    i += 1;
                }
                "--user" | "-u" => {
                    parsed.user = value.unwrap_or(parsed.user);
                    i += 1;
                }
                "--password" | "-P" => {
                    parsed.password = value;
                    i += 1;
                }
                "--key" | "-k" => {
                    parsed.key = value.map(PathBuf::from);
                    i += 1;
                }
                "--admin-password" | "-a" => {
                    parsed.admin_password = value;
                    i += 1;
                }
                "--timeout" | "-t" => {
                    parsed.timeout = value.and_then(|v| v.parse().ok()).unwrap_or(30);
                    i += 1;
                }
                "--save" => parsed.save = true,
                "--help" => {
                    println!(
                        "Usage: show_status [--host H] [--port P] [--user U] \
                         (--password PW | --key PATH) [--admin-password PW] [--save] [--timeout SECS]"
                    );
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    std::process::exit(1);
                }
            }
            i += 1;
        }
        parsed
    }
}
