use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::info;
use referer_mod_e2e::cases::{self, DEFAULT_START, TEST_HOSTS};
use referer_mod_e2e::logging;
use referer_mod_e2e::rules::RuleConfig;
use referer_mod_e2e::server::{parse_link_list, TestServer};
use referer_mod_e2e::HarnessConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// End-to-end tests for the Referer Modifier extension
#[derive(Parser, Debug)]
#[command(name = "referer-mod-e2e", version, about)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run only the test server, like the standalone test environment
    Serve(ServeArgs),
    /// Print the referrers a rule file implies for the default navigation chain
    Expect {
        /// Rule file to evaluate
        #[arg(long, default_value = "fixtures/test_config.json")]
        rules: PathBuf,
        /// Page the chain starts from
        #[arg(long, default_value = DEFAULT_START)]
        start: String,
        /// Hosts to visit, in order
        #[arg(long, value_delimiter = ',')]
        targets: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Leave the browser open after the run
    #[arg(long)]
    keep_open: bool,

    /// Start a browser for manual testing instead of running assertions
    #[arg(long)]
    interactive: bool,

    /// Extension directory (manifest.json, built package, test_config.json)
    #[arg(long)]
    extension: Option<PathBuf>,

    /// Rule file to import
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Extension package to install instead of referer-mod-{version}.zip
    #[arg(long)]
    addon: Option<PathBuf>,

    /// Connect to a running WebDriver server instead of spawning geckodriver
    #[arg(long)]
    webdriver: Option<String>,

    /// Test server / proxy port
    #[arg(long)]
    port: Option<u16>,

    /// Upper bound for each wait, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Skip the popup enable/disable round trip
    #[arg(long)]
    no_toggle: bool,

    /// Derive expectations from the rule file instead of the built-in table
    #[arg(long)]
    derive: bool,

    /// Write a JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    /// Apply the command line on top of `config`. `--extension` also moves
    /// the rule file into that directory unless `--rules` names one.
    fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        config.keep_open = self.keep_open;
        config.interactive = self.interactive;
        config.check_toggle = !self.no_toggle;
        if let Some(dir) = &self.extension {
            config.rules_path = dir.join("test_config.json");
            config.extension_dir = dir.clone();
        }
        if let Some(rules) = &self.rules {
            config.rules_path = rules.clone();
        }
        if let Some(addon) = &self.addon {
            config.addon_path = Some(addon.clone());
        }
        if let Some(url) = &self.webdriver {
            config.webdriver_url = Some(url.clone());
        }
        if let Some(port) = self.port {
            config.proxy_port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        config
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Server port to use
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    listen: IpAddr,

    /// Other servers to link to, comma separated
    #[arg(long, default_value = "")]
    links: String,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match dispatch(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the run passed
fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Some(Command::Serve(args)) => serve(args),
        Some(Command::Expect { rules, start, targets }) => expect(&rules, &start, &targets),
        None => run(cli.run),
    }
}

fn serve(args: ServeArgs) -> anyhow::Result<bool> {
    let links = parse_link_list(&args.links)?;
    let server = TestServer::bind(SocketAddr::new(args.listen, args.port), &links)?;
    info!("Serving {} link(s); stop with Ctrl-C", links.len());
    server.wait();
    Ok(true)
}

fn expect(rules: &Path, start: &str, targets: &[String]) -> anyhow::Result<bool> {
    let config = RuleConfig::load(rules)?;
    let targets: Vec<&str> = if targets.is_empty() {
        TEST_HOSTS.to_vec()
    } else {
        targets.iter().map(String::as_str).collect()
    };
    for case in cases::derive_suite(&config, start, &targets)? {
        println!(
            "{} -> {}: {}",
            case.start,
            case.target,
            case.expected.as_deref().unwrap_or("(no referrer)")
        );
    }
    Ok(true)
}

#[cfg(feature = "webdriver")]
fn run(args: RunArgs) -> anyhow::Result<bool> {
    use referer_mod_e2e::runner::Harness;

    let config = args.apply(HarnessConfig::from_env());
    let harness = Harness::new(config).context("failed to set up the test environment")?;

    let result = run_with(&harness, &args);
    finish_after(result, || harness.finish())
}

/// Run `finish` whatever `result` holds, so `--keep-open` also pauses after
/// a failed run. The run's own error wins over one from `finish`.
#[cfg_attr(not(feature = "webdriver"), allow(dead_code))]
fn finish_after<T, F>(result: anyhow::Result<T>, finish: F) -> anyhow::Result<T>
where
    F: FnOnce() -> referer_mod_e2e::Result<()>,
{
    let finished = finish();
    let value = result?;
    finished?;
    Ok(value)
}

#[cfg(feature = "webdriver")]
fn run_with(harness: &referer_mod_e2e::runner::Harness, args: &RunArgs) -> anyhow::Result<bool> {
    if args.interactive {
        harness.interactive()?;
        return Ok(true);
    }

    let suite = if args.derive {
        cases::derive_suite(harness.rules(), DEFAULT_START, &TEST_HOSTS)?
    } else {
        cases::default_suite()
    };
    let report = harness.run_suite(&suite)?;

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }

    info!(
        "{} of {} navigation(s) passed, {} failure(s)",
        report.cases.iter().filter(|c| c.passed()).count(),
        report.cases.len(),
        report.failures()
    );
    Ok(report.passed())
}

#[cfg(not(feature = "webdriver"))]
fn run(_args: RunArgs) -> anyhow::Result<bool> {
    anyhow::bail!("browser runs need the `webdriver` feature; only `serve` and `expect` are available")
}
