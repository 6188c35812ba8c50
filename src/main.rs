use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use circlo_chat::api::{
    Activity, ApiClient, CreateActivityRequest, HistoryLoader, JoinRequest, Notification,
    SignupRequest,
};
use circlo_chat::config::{self, AppConfig};
use circlo_chat::storage::SessionStore;
use circlo_chat::ui::ChatApp;
use circlo_chat::ui::render::format_message;
use circlo_chat::{ChatClient, ChatError, Result, Session};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::BufReader;

#[derive(Parser)]
#[command(
    name = "circlo-chat",
    version,
    about = "Circlo client: nearby activities, join requests and group chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and store the session
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        interests: Vec<String>,
    },
    Logout,
    /// Renew the stored session with the refresh token
    Refresh,
    /// Show the stored user
    Whoami,
    /// Activities around a point
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Defaults to `default_radius_km` from the config
        #[arg(long)]
        radius: Option<f64>,
        #[arg(long = "type")]
        kind: Option<String>,
    },
    Activity {
        #[command(subcommand)]
        action: ActivityAction,
    },
    /// Join requests
    Request {
        #[command(subcommand)]
        action: RequestAction,
    },
    Notifications(NotificationArgs),
    /// Print a page of chat history
    History {
        #[arg(long)]
        group: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// Open the chat screen
    Chat(ChatTarget),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the effective configuration to the config file
    Init,
}

#[derive(Subcommand)]
enum ActivityAction {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long = "type")]
        kind: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Local time, `YYYY-MM-DDTHH:MM`
        #[arg(long, value_parser = parse_schedule)]
        at: NaiveDateTime,
        #[arg(long, default_value_t = 6)]
        max_members: u32,
    },
    Show {
        id: String,
    },
    Mine,
    Close {
        id: String,
    },
    Cancel {
        id: String,
    },
}

#[derive(Subcommand)]
enum RequestAction {
    Send {
        activity_id: String,
        #[arg(long)]
        message: Option<String>,
    },
    Accept {
        id: String,
        #[arg(long)]
        review: Option<String>,
    },
    Reject {
        id: String,
        #[arg(long)]
        review: Option<String>,
    },
    /// Requests for one of your activities
    List {
        activity_id: String,
        /// Accepted members only
        #[arg(long)]
        members: bool,
    },
    Mine,
}

#[derive(Args)]
struct NotificationArgs {
    #[command(subcommand)]
    action: Option<NotificationAction>,
    #[arg(long)]
    unread: bool,
    #[arg(long)]
    count: bool,
}

#[derive(Subcommand)]
enum NotificationAction {
    /// Mark one or all notifications as read
    Read {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ChatTarget {
    #[arg(long)]
    group: Option<String>,
    #[arg(long)]
    activity: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ChatError::Unauthorized) => {
            eprintln!("session expired, please log in (circlo-chat login)");
            ExitCode::from(2)
        }
        Err(ChatError::MissingToken) => {
            eprintln!("not logged in; run `circlo-chat login` first");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app_config = config::load_effective(&cli.config);

    if let Command::Config {
        action: ConfigAction::Init,
    } = &cli.command
    {
        config::save_config(&cli.config, &app_config)?;
        println!("wrote {}", cli.config);
        return Ok(());
    }

    let store = Arc::new(SessionStore::open(app_config.session_db_path())?);
    let api = ApiClient::new(
        &app_config.api_base_url,
        app_config.request_timeout(),
        store,
    )?;

    match cli.command {
        Command::Config { .. } => Ok(()),
        Command::Login { email, password } => {
            let password = password_or_prompt(password)?;
            let session = api.login(&email, &password).await?;
            println!("logged in as {}", session.display_name());
            Ok(())
        }
        Command::Signup {
            name,
            email,
            password,
            bio,
            interests,
        } => {
            let request = SignupRequest {
                name,
                email,
                password: password_or_prompt(password)?,
                bio,
                interests,
            };
            let session = api.signup(&request).await?;
            println!("welcome, {}", session.display_name());
            Ok(())
        }
        Command::Logout => {
            api.logout().await?;
            println!("logged out");
            Ok(())
        }
        Command::Refresh => {
            let session = api.refresh().await?;
            println!("session renewed for {}", session.display_name());
            Ok(())
        }
        Command::Whoami => {
            let session = require_session(&api)?;
            let user = &session.user;
            println!("{} (id {})", session.display_name(), user.id);
            if let Some(email) = &user.email {
                println!("email: {email}");
            }
            if !user.interests.is_empty() {
                println!("interests: {}", user.interests.join(", "));
            }
            Ok(())
        }
        Command::Nearby {
            lat,
            lon,
            radius,
            kind,
        } => {
            require_session(&api)?;
            let radius = radius.unwrap_or(app_config.default_radius_km);
            let activities = api.nearby(lat, lon, radius, kind.as_deref()).await?;
            if activities.is_empty() {
                println!("nothing within {radius} km");
            }
            activities.iter().for_each(print_activity);
            Ok(())
        }
        Command::Activity { action } => {
            require_session(&api)?;
            activity_command(&api, action).await
        }
        Command::Request { action } => {
            require_session(&api)?;
            request_command(&api, action).await
        }
        Command::Notifications(args) => {
            require_session(&api)?;
            notification_command(&api, args).await
        }
        Command::History { group, page, size } => {
            let session = require_session(&api)?;
            let loader = HistoryLoader::new(api);
            let size = size.unwrap_or(app_config.history_page_size);
            let messages = loader.load(&group, page, size).await?;
            if messages.is_empty() {
                println!("no messages yet");
            }
            for message in &messages {
                println!("{}", format_message(message, session.user_id(), &Local));
            }
            Ok(())
        }
        Command::Chat(target) => {
            let session = require_session(&api)?;
            run_chat(&app_config, api, session, target).await
        }
    }
}

async fn run_chat(
    app_config: &AppConfig,
    api: ApiClient,
    session: Session,
    target: ChatTarget,
) -> Result<()> {
    let group_id = match (target.group, target.activity) {
        (Some(group), _) => group,
        (None, Some(activity)) => {
            let group = api.group_for_activity(&activity).await?;
            println!("{}", group.display_name());
            group.id
        }
        (None, None) => return Err(ChatError::Decode("no group or activity given".into())),
    };

    let client = Arc::new(ChatClient::new(app_config.transport_settings()));
    let mut app = ChatApp::new(
        client,
        HistoryLoader::new(api),
        session,
        app_config.history_page_size,
        io::stdout(),
    );
    println!("type to chat; /switch <group>, /history, /quit");
    app.run(&group_id, BufReader::new(tokio::io::stdin())).await
}

async fn activity_command(api: &ApiClient, action: ActivityAction) -> Result<()> {
    match action {
        ActivityAction::Create {
            title,
            description,
            kind,
            lat,
            lon,
            at,
            max_members,
        } => {
            let request = CreateActivityRequest {
                title,
                description,
                kind,
                latitude: lat,
                longitude: lon,
                scheduled_date: at,
                max_members,
            };
            print_activity(&api.create_activity(&request).await?);
        }
        ActivityAction::Show { id } => print_activity(&api.activity(&id).await?),
        ActivityAction::Mine => api.my_activities().await?.iter().for_each(print_activity),
        ActivityAction::Close { id } => print_activity(&api.close_activity(&id).await?),
        ActivityAction::Cancel { id } => print_activity(&api.cancel_activity(&id).await?),
    }
    Ok(())
}

async fn request_command(api: &ApiClient, action: RequestAction) -> Result<()> {
    match action {
        RequestAction::Send {
            activity_id,
            message,
        } => print_request(&api.request_to_join(&activity_id, message.as_deref()).await?),
        RequestAction::Accept { id, review } => {
            print_request(&api.accept_request(&id, review.as_deref()).await?)
        }
        RequestAction::Reject { id, review } => {
            print_request(&api.reject_request(&id, review.as_deref()).await?)
        }
        RequestAction::List {
            activity_id,
            members,
        } => {
            let requests = if members {
                api.members(&activity_id).await?
            } else {
                api.requests_for_activity(&activity_id).await?
            };
            requests.iter().for_each(print_request);
        }
        RequestAction::Mine => api.my_requests().await?.iter().for_each(print_request),
    }
    Ok(())
}

async fn notification_command(api: &ApiClient, args: NotificationArgs) -> Result<()> {
    match args.action {
        Some(NotificationAction::Read { id: Some(id), .. }) => {
            api.mark_read(&id).await?;
            println!("marked {id} as read");
        }
        Some(NotificationAction::Read { all: true, .. }) => {
            api.mark_all_read().await?;
            println!("all notifications marked as read");
        }
        Some(NotificationAction::Read { .. }) => {
            eprintln!("give a notification id or --all");
        }
        None if args.count => println!("{}", api.unread_count().await?),
        None => {
            let notifications = if args.unread {
                api.unread_notifications().await?
            } else {
                api.notifications().await?
            };
            if notifications.is_empty() {
                println!("no notifications");
            }
            notifications.iter().for_each(print_notification);
        }
    }
    Ok(())
}

fn require_session(api: &ApiClient) -> Result<Session> {
    api.current_session()?.ok_or(ChatError::MissingToken)
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_schedule(value: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|err| format!("expected YYYY-MM-DDTHH:MM: {err}"))
}

fn print_activity(activity: &Activity) {
    let members = match (activity.current_members, activity.max_members) {
        (Some(current), Some(max)) => format!(" {current}/{max}"),
        _ => String::new(),
    };
    let distance = activity
        .distance
        .map(|km| format!(" {km:.1} km"))
        .unwrap_or_default();
    println!(
        "#{} {} [{}]{}{} {}",
        activity.id,
        activity.title,
        activity.kind.as_deref().unwrap_or("-"),
        members,
        distance,
        activity.status.as_deref().unwrap_or(""),
    );
}

fn print_request(request: &JoinRequest) {
    println!(
        "#{} {} -> {} ({})",
        request.id,
        request.user_name.as_deref().unwrap_or("?"),
        request
            .activity_title
            .as_deref()
            .unwrap_or(&request.activity_id),
        request.status.as_deref().unwrap_or("PENDING"),
    );
    if let Some(message) = &request.message {
        println!("    \"{message}\"");
    }
}

fn print_notification(notification: &Notification) {
    let marker = if notification.is_read { " " } else { "*" };
    println!(
        "{marker} #{} {}: {}",
        notification.id,
        notification.title.as_deref().unwrap_or("notification"),
        notification.message.as_deref().unwrap_or(""),
    );
}
