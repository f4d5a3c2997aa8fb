use std::net::SocketAddr;
use std::time::Duration;

use structopt::StructOpt;

use basic_paxos::durable::Disk;
use basic_paxos::{Client, Config};

#[derive(StructOpt)]
#[structopt(name = "basic-paxos-harness")]
enum Opt {
    /// Run a quorum node with the echo processor
    Serve {
        /// Address to listen on
        #[structopt(short = "l", long = "listen")]
        listen: SocketAddr,

        /// A quorum member; repeat for every server, this node included
        #[structopt(short = "s", long = "server")]
        servers: Vec<SocketAddr>,

        /// Minimum accepted history to retain
        #[structopt(long = "history", default_value = "100")]
        history: i64,

        /// Reconnect interval between servers (in milliseconds)
        #[structopt(short = "t", long = "timeout", default_value = "1000")]
        timeout: u64,

        /// Persist accepted values to this file instead of memory
        #[structopt(long = "storage")]
        storage: Option<std::path::PathBuf>,
    },

    /// Send one workload to the leader and print the reply
    Send {
        /// Leader address
        #[structopt(short = "a", long = "address")]
        address: SocketAddr,

        /// Workload bytes
        workload: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Opt::from_args() {
    | Opt::Serve { listen, servers, history, timeout, storage } => {
        let mut config = Config::new()
            .with_history_size(history)
            .with_retry_interval(Duration::from_millis(timeout));
        if let Some(path) = storage {
            config = config.with_storage(Box::new(Disk::open(path)?));
        }

        let node = config
            .bind(listen, |workload: &[u8]| workload.to_vec())
            .await?;
        log::info!("listening on {}", node.local_addr());
        node.serve(servers).await?;
    }
    | Opt::Send { address, workload } => {
        let mut client = Client::connect(address).await?;
        let reply = client.issue(workload.into_bytes()).await?;
        println!("{}", String::from_utf8_lossy(&reply));
    }
    }

    Ok(())
}
