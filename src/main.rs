//! Shopbot CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use shopbot::dispatch::Dispatcher;
use shopbot::store::{TaskStatus, TaskStore, TenantStore};
use shopbot::{InboundMessage, TaskId};

#[derive(Parser)]
#[command(name = "shopbot")]
#[command(about = "Dispatches storefront chat messages to an AI agent and manages replies")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a tenant's pending tasks and dispatch them until interrupted
    Run {
        /// Tenant to poll
        #[arg(long)]
        tenant: String,
        /// Seconds between polls
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Record one inbound message and dispatch it immediately
    Send {
        #[arg(long)]
        tenant: String,
        /// LINE user id of the customer
        #[arg(long)]
        user: String,
        /// Message text
        text: String,
    },
    /// List a tenant's tasks in a given state
    List {
        #[arg(long)]
        tenant: String,
        /// One of: Pending, Processing, Awaiting_Approval, Responded, Error, FatalError
        #[arg(long, default_value = "Awaiting_Approval")]
        status: String,
    },
    /// Resolve a held task with an operator-written reply
    Respond {
        #[arg(long)]
        task_id: TaskId,
        text: String,
    },
    /// Enroll a tenant's LINE channel credentials
    Enroll {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        access_token: String,
        /// Storefront display name used in the agent prompt
        #[arg(long)]
        store_name: Option<String>,
    },
    /// Turn automatic reply delivery on or off for a tenant
    AutoReply {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = shopbot::config::Config::load()
        .context("failed to load configuration from environment")?;

    let pool = shopbot::store::connect(&config.sqlite_path())
        .await
        .context("failed to open the task database")?;

    let tasks = TaskStore::new(pool.clone());
    let tenants = TenantStore::new(pool.clone());
    let dispatcher = Dispatcher::new(
        tasks.clone(),
        tenants.clone(),
        Arc::new(shopbot::agent::GeminiAgentFactory::new(
            config.model.clone(),
            tenants.clone(),
            tasks.clone(),
            config.dispatch.history_limit,
        )),
        Arc::new(shopbot::messaging::LinePushClient::new()),
        config.dispatch,
    );

    match cli.command {
        Command::Run { tenant, interval } => {
            tracing::info!(tenant, interval, "polling for pending tasks");
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dispatcher.process_pending(&tenant).await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("shutdown signal received");
                        break;
                    }
                }
            }
            pool.close().await;
        }
        Command::Send { tenant, user, text } => {
            let inbound = InboundMessage {
                tenant_id: tenant.into(),
                channel_user_id: user,
                text,
                // CLI sends have no webhook event behind them; stamp a
                // synthetic token to keep the audit trail uniform.
                reply_token: format!("cli-{}", uuid::Uuid::new_v4()),
            };
            let task_id = tasks
                .create(
                    &inbound.tenant_id,
                    &inbound.channel_user_id,
                    &inbound.reply_token,
                    &inbound.text,
                )
                .await
                .context("failed to record the inbound message")?;
            dispatcher
                .process(
                    &inbound.tenant_id,
                    &inbound.channel_user_id,
                    &inbound.text,
                    task_id,
                )
                .await;

            let task = tasks
                .get(task_id)
                .await?
                .context("dispatched task disappeared")?;
            println!("task {} -> {}", task.task_id, task.status);
            if let Some(reply) = &task.agent_response {
                println!("{reply}");
            }
        }
        Command::List { tenant, status } => {
            let status = TaskStatus::parse(&status)
                .with_context(|| format!("unknown task status: {status}"))?;
            for task in tasks.list_by_status(&tenant, status).await? {
                println!(
                    "#{} [{}] {} | {}",
                    task.task_id,
                    task.created_at.format("%Y-%m-%d %H:%M"),
                    task.channel_user_id,
                    task.user_message
                );
            }
        }
        Command::Respond { task_id, text } => {
            let task = tasks
                .get(task_id)
                .await?
                .with_context(|| format!("no such task: {task_id}"))?;
            let credentials = tenants
                .credentials(&task.tenant_id)
                .await?
                .context("tenant has no channel credentials")?;

            use shopbot::messaging::ChannelClient as _;
            shopbot::messaging::LinePushClient::new()
                .push(&task.channel_user_id, &text, &credentials.channel_access_token)
                .await
                .context("failed to deliver the operator reply")?;
            tasks.set_operator_response(task_id, &text).await?;
            println!("task {task_id} -> Responded");
        }
        Command::Enroll {
            tenant,
            secret,
            access_token,
            store_name,
        } => {
            tenants
                .upsert_credentials(&tenant, &secret, &access_token)
                .await?;
            if let Some(name) = store_name {
                tenants.set_store_name(&tenant, &name).await?;
            }
            println!("tenant {tenant} enrolled");
        }
        Command::AutoReply { tenant, enabled } => {
            tenants.set_auto_reply(&tenant, enabled).await?;
            println!(
                "auto-reply for {tenant} is now {}",
                if enabled { "on" } else { "off" }
            );
        }
    }

    Ok(())
}
