use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dms_db::CancelOutcome;
use dms_schemas::OrderId;
use tracing::info;

#[derive(Parser)]
#[command(name = "dms")]
#[command(about = "Delivery management operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Order inspection and cancellation (writes storage directly)
    Orders {
        #[command(subcommand)]
        cmd: OrdersCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> local)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum OrdersCmd {
    /// List orders, newest first.
    List {
        /// Only this customer's orders
        #[arg(long)]
        customer: Option<i64>,
    },

    /// Cancel an order in storage. A running daemon notices on its next tick.
    Cancel {
        /// Order id
        id: OrderId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = dms_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = dms_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                }
                DbCmd::Migrate => {
                    dms_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Orders { cmd } => {
            let pool = dms_db::connect_from_env().await?;
            match cmd {
                OrdersCmd::List { customer } => {
                    let orders = match customer {
                        Some(c) => dms_db::list_orders_by_customer(&pool, c).await?,
                        None => dms_db::list_all_orders(&pool).await?,
                    };
                    for o in &orders {
                        println!(
                            "id={} customer_id={} status={} item={:?} updated_at={}",
                            o.id,
                            o.customer_id,
                            o.status,
                            o.item,
                            o.updated_at.to_rfc3339()
                        );
                    }
                    println!("count={}", orders.len());
                }
                OrdersCmd::Cancel { id } => {
                    match dms_db::cancel_order(&pool, id)
                        .await
                        .with_context(|| format!("cancel order {id}"))?
                    {
                        CancelOutcome::Cancelled => {
                            info!(order_id = id, "order cancelled from cli");
                            println!("order_id={id} status=cancelled");
                        }
                        CancelOutcome::AlreadyTerminal(status) => {
                            bail!("REFUSING CANCEL: order {id} is already {status}")
                        }
                        CancelOutcome::NotFound => bail!("ORDER_NOT_FOUND: {id}"),
                    }
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = dms_config::load_layered_yaml(&path_refs)?;
            // Typed parse surfaces CONFIG_INVALID before the hash is trusted.
            loaded.daemon()?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }
    }

    Ok(())
}
