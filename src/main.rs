use anyhow::Result;

use cellscope::{actions, boot, cli};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::parse_args();
    boot::init_logging(matches.get_one::<String>("log-file").map(String::as_str));

    if matches.get_flag("list-ports") {
        return actions::list_ports(matches.get_flag("json"));
    }

    actions::run_monitor(&matches).await
}
