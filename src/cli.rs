use clap::{Arg, ArgAction, ArgMatches, Command};

pub fn build_command() -> Command {
    Command::new("cellscope")
        .about("Live monitor for a serial battery cell-voltage instrument")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print port listings and readings as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port of the instrument (default: the only connected port)")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .short('b')
                .help("Baud rate (default: 115200)")
                .value_name("BAUD")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load session settings from a .json or .toml file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Write logs to this file instead of stderr")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("replay")
                .long("replay")
                .help("Replay a captured instrument log instead of opening a device")
                .value_name("FILE")
                .conflicts_with("port"),
        )
        .arg(
            Arg::new("export-csv")
                .long("export-csv")
                .help("Write every reading of the run to a CSV file on exit")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("history-limit")
                .long("history-limit")
                .help("Keep only the most recent N readings for export (default: all)")
                .value_name("N")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("export-json")
                .long("export-json")
                .help("Write every reading of the run to a JSON file on exit")
                .value_name("FILE"),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}
