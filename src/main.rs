use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

const HELP: &str = "PopLens: review films, books and games from the terminal.

  --version, -V                 Show version and exit
  --help,    -h                 Show this help message
  --login <user> [--api <url>]  Sign in (password is read from stdin)
  --register <user> <email>     Create an account (password is read from stdin)
  --logout                      Forget the saved session
  --whoami                      Show the signed-in user
  --demo                        Browse built-in sample data without a server";

enum Command {
    Version,
    Help,
    Login {
        username: String,
        api_url: Option<String>,
    },
    Register {
        username: String,
        email: String,
    },
    Logout,
    WhoAmI,
    Run {
        demo: bool,
    },
}

fn main() {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = execute(command) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Command> {
    let mut args = args.peekable();
    let mut command = Command::Run { demo: false };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--login" => {
                let username = args.next().context("--login needs a username")?;
                let mut api_url = None;
                if args.peek().map(String::as_str) == Some("--api") {
                    args.next();
                    api_url = Some(args.next().context("--api needs a URL")?);
                }
                command = Command::Login { username, api_url };
            }
            "--register" => {
                let username = args.next().context("--register needs a username")?;
                let email = args.next().context("--register needs an email")?;
                command = Command::Register { username, email };
            }
            "--logout" => command = Command::Logout,
            "--whoami" => command = Command::WhoAmI,
            "--demo" => command = Command::Run { demo: true },
            other => bail!("unknown argument {other}"),
        }
    }
    Ok(command)
}

fn execute(command: Command) -> Result<()> {
    match command {
        Command::Version => println!("PopLens {}", poplens::VERSION),
        Command::Help => println!("{HELP}"),
        Command::Login { username, api_url } => {
            let password = read_password()?;
            let identity = poplens::app::login(&username, &password, api_url.as_deref())?;
            println!("Signed in as {}.", identity.username);
        }
        Command::Register { username, email } => {
            let password = read_password()?;
            poplens::app::register(&username, &email, &password)?;
            println!("Account {username} created. Sign in with --login {username}.");
        }
        Command::Logout => {
            poplens::app::logout()?;
            println!("Signed out.");
        }
        Command::WhoAmI => match poplens::app::whoami()? {
            Some(identity) => println!("{} (profile {})", identity.username, identity.profile_id),
            None => println!("Not logged in."),
        },
        Command::Run { demo } => poplens::app::run_with(poplens::app::RunOptions { demo })?,
    }
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
