use clap::{Args, Parser, Subcommand};
use cli::agent::{self, AgentConfig, AgentError, SpaceFilter, SyncState};
use cli::api::{ApiClient, ApiError};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;
use wire::{BookingRequest, Space, SpaceType};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}", .0.user_message())]
    Api(#[from] ApiError),
    #[error("sync agent failed: {0}")]
    Agent(#[from] AgentError),
    #[error("invalid timestamp `{0}`; expected RFC 3339")]
    InvalidTime(String),
    #[error("unknown space type `{0}`")]
    UnknownType(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "calm", about = "Calm Corners seat availability CLI")]
struct Cli {
    #[arg(long, env = "CALM_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "CALM_USER_ID")]
    user_id: Option<String>,

    #[arg(long, env = "CALM_ADMIN_TOKEN")]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check server health.
    Ping,
    /// List spaces, optionally filtered.
    Spaces(FilterArgs),
    /// Show one space.
    Space { space_id: i64 },
    /// Book one seat.
    Book {
        space_id: i64,
        #[arg(long, help = "RFC 3339 start; defaults to now")]
        start: Option<String>,
        #[arg(long, help = "RFC 3339 end; defaults to the server's booking duration")]
        end: Option<String>,
    },
    /// Cancel one of your bookings.
    Cancel { booking_id: i64 },
    /// List your bookings, newest first.
    Bookings,
    /// List your favorite spaces with current availability.
    Favorites,
    /// Add a space to your favorites.
    Favorite { space_id: i64 },
    /// Remove a space from your favorites.
    Unfavorite { space_id: i64 },
    /// Correct a space's availability (admin).
    Adjust {
        space_id: i64,
        #[arg(allow_hyphen_values = true)]
        delta: i32,
    },
    /// Follow live availability until interrupted.
    Watch(FilterArgs),
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long = "type")]
    kind: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    wifi: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    power: bool,
    #[arg(long)]
    group: bool,
    #[arg(long, help = "Only spaces with a free seat")]
    available: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<SpaceFilter, CliError> {
        let kind = match self.kind.as_deref() {
            Some(raw) => Some(SpaceType::parse(raw).ok_or_else(|| CliError::UnknownType(raw.to_owned()))?),
            None => None,
        };
        Ok(SpaceFilter {
            search: self.search.clone(),
            kind,
            wifi: self.wifi,
            quiet: self.quiet,
            power: self.power,
            groups: self.group,
            available_only: self.available,
        })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let client = ApiClient::new(cli.base_url.clone())
        .with_user(cli.user_id)
        .with_admin_token(cli.admin_token);

    match cli.command {
        Command::Ping => {
            let health = client.healthz().await?;
            println!("ok {}", health.get("version").unwrap_or(&Value::Null));
        }
        Command::Spaces(args) => {
            let filter = args.to_filter()?;
            let (spaces, version) = client.list_spaces().await?;
            if let Some(version) = version {
                eprintln!("state version {version}");
            }
            spaces.iter().filter(|s| filter.matches(s)).for_each(print_space);
        }
        Command::Space { space_id } => print_json(&client.get_space(space_id).await?)?,
        Command::Book { space_id, start, end } => {
            let request = BookingRequest {
                space_id,
                start_time: start.as_deref().map(parse_time).transpose()?,
                end_time: end.as_deref().map(parse_time).transpose()?,
            };
            print_json(&client.book(&request).await?)?;
        }
        Command::Cancel { booking_id } => print_json(&client.cancel(booking_id).await?)?,
        Command::Bookings => print_json(&client.list_bookings().await?)?,
        Command::Favorites => {
            for favorite in client.list_favorites().await? {
                match &favorite.space {
                    Some(space) => print_space(space),
                    None => println!("{:>4}  (no longer listed)", favorite.space_id),
                }
            }
        }
        Command::Favorite { space_id } => print_json(&client.add_favorite(space_id).await?)?,
        Command::Unfavorite { space_id } => {
            client.remove_favorite(space_id).await?;
            println!("removed {space_id} from favorites");
        }
        Command::Adjust { space_id, delta } => print_space(&client.adjust_seats(space_id, delta).await?),
        Command::Watch(args) => watch(cli.base_url, args.to_filter()?).await?,
    }
    Ok(())
}

async fn watch(base_url: String, filter: SpaceFilter) -> Result<(), CliError> {
    let handle = agent::spawn(AgentConfig::new(base_url))?;
    let mut rx = handle.subscribe();

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = rx.borrow_and_update().clone();
                render(&state, &filter);
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn render(state: &SyncState, filter: &SpaceFilter) {
    let link = if state.connected() { "live" } else { "offline" };
    println!("--- {link} v{}", state.version().unwrap_or(0));
    state.filter(filter).into_iter().for_each(print_space);
}

fn print_space(space: &Space) {
    println!(
        "{:>4}  {:<28} {:<9} {:>3}/{:<3}",
        space.id,
        space.name,
        space.kind.as_str(),
        space.available_seats,
        space.total_seats
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn parse_time(raw: &str) -> Result<OffsetDateTime, CliError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|_| CliError::InvalidTime(raw.to_owned()))
}
