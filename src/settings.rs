use clap::{App, AppSettings, Arg, ArgMatches};
use vatslots_vm::Settings;

pub enum RunMode {
    Scenario(String),
    List,
}

pub fn opts_with_clap() -> (Settings, RunMode, bool) {
    let app = App::new("vatslots")
        .version(clap::crate_version!())
        .setting(AppSettings::TrailingVarArg)
        .about("Runs the virtual object layer through a scripted scenario and prints what it persisted.")
        .arg(
            Arg::with_name("scenario")
                .help("scenario to run; see --list")
                .required_unless("list"),
        )
        .arg(
            Arg::with_name("list")
                .long("list")
                .help("list the available scenarios"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Give the verbosity (can be applied multiple times)"),
        )
        .arg(
            Arg::with_name("max-capdata-size")
                .long("max-capdata-size")
                .takes_value(true)
                .value_name("BYTES")
                .validator(|s| s.parse::<usize>().map(drop).map_err(|e| e.to_string()))
                .help("largest accepted serialized payload"),
        )
        .arg(
            Arg::with_name("relax-durability")
                .long("relax-durability")
                .help("let durable kinds hold references to ephemeral objects"),
        )
        .arg(
            Arg::with_name("log-store")
                .long("log-store")
                .help("print every backing store operation"),
        );
    let matches = app.get_matches();
    settings_from(&matches)
}

fn settings_from(matches: &ArgMatches) -> (Settings, RunMode, bool) {
    let mut settings = Settings::default();
    if let Some(size) = matches
        .value_of("max-capdata-size")
        .and_then(|s| s.parse().ok())
    {
        settings.max_capdata_size = size;
    }
    settings.relax_durability_rules = matches.is_present("relax-durability");
    settings.log_store_ops = matches.is_present("log-store");

    let mode = if matches.is_present("list") {
        RunMode::List
    } else {
        RunMode::Scenario(matches.value_of("scenario").unwrap_or_default().to_owned())
    };
    (settings, mode, matches.occurrences_of("verbose") > 0)
}
