use std::sync::Arc;

use agora::{
    init_logger, Address, Aggregator, PollCache, PollId, PollKey, RestGateway, RestGatewayConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    main_inner().await
}

/// Command line helper to inspect polls on the ledger.
///
/// Queries only: mutating operations need the wallet's signing context
/// and go through an application session instead.
#[derive(clap::Parser)]
struct Opt {
    /// Root of the node's REST API, including the version segment.
    #[clap(
        long,
        env = "AGORA_NODE_URL",
        default_value = "https://fullnode.devnet.aptoslabs.com/v1/"
    )]
    node: Url,
    /// Account the poll module is published under.
    #[clap(long, env = "AGORA_MODULE_ADDRESS")]
    module: Address,
    /// Enable verbose logging.
    #[clap(long, short)]
    verbose: bool,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Parser)]
enum Cmd {
    /// List all polls created by an account, newest first.
    Polls { owner: Address },
    /// Show a single poll's metadata.
    Info { owner: Address, poll_id: u64 },
    /// Show a poll's tallies.
    Results { owner: Address, poll_id: u64 },
    /// Show all feedback left on a poll.
    Feedbacks { owner: Address, poll_id: u64 },
    /// Check whether an account voted on a poll, and for what.
    Vote {
        owner: Address,
        poll_id: u64,
        voter: Address,
    },
}

async fn main_inner() -> Result<()> {
    let opt = Opt::parse();
    init_logger(opt.verbose, Some("agora_cli"));

    let config = RestGatewayConfig::new(opt.node.clone(), opt.module.clone());
    let gateway = RestGateway::read_only(config)
        .with_context(|| format!("building a gateway for {}", opt.node))?;
    let aggregator = Aggregator::new(gateway, Arc::new(PollCache::new()));

    match opt.cmd {
        Cmd::Polls { owner } => {
            let polls = aggregator.all_polls(&owner).await?;
            if polls.is_empty() {
                eprintln!("No polls found for {owner}");
                return Ok(());
            }
            for summary in polls {
                let poll = &summary.poll;
                let status = if poll.is_closed_at(jiff::Timestamp::now()) {
                    "closed"
                } else {
                    "open"
                };
                println!(
                    "#{} {} ({} votes, {status})",
                    poll.id, poll.title, poll.total_votes
                );
            }
        }
        Cmd::Info { owner, poll_id } => {
            let poll = aggregator
                .poll_info(&PollKey::new(owner, PollId(poll_id)))
                .await?;
            println!("{}", serde_json::to_string_pretty(&poll)?);
        }
        Cmd::Results { owner, poll_id } => {
            let key = PollKey::new(owner, PollId(poll_id));
            let results = aggregator.poll_results(&key).await?;
            let poll = aggregator.poll_info(&key).await?;
            for (option, count) in poll.options.iter().zip(&results.counts) {
                println!("{count:>6}  {option}");
            }
            println!("{:>6}  total", results.total_votes);
        }
        Cmd::Feedbacks { owner, poll_id } => {
            let feedbacks = aggregator
                .feedbacks(&PollKey::new(owner, PollId(poll_id)))
                .await?;
            if feedbacks.is_empty() {
                eprintln!("No feedback yet");
                return Ok(());
            }
            for entry in feedbacks {
                println!("- {entry}");
            }
        }
        Cmd::Vote {
            owner,
            poll_id,
            voter,
        } => {
            let key = PollKey::new(owner, PollId(poll_id));
            match aggregator.voter_choice(&key, &voter).await? {
                Some(index) => {
                    let poll = aggregator.poll_info(&key).await?;
                    match poll.options.get(usize::from(index)) {
                        Some(option) => println!("{voter} voted for option {index}: {option}"),
                        None => println!("{voter} voted for option {index}"),
                    }
                }
                None => println!("{voter} has not voted on {key}"),
            }
        }
    }
    Ok(())
}
