use std::env::current_dir;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Error, anyhow};
use console::{Term, style};
use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;
use tracing::{error, info, trace};

use crate::civitai::io::Config;
use crate::civitai::io::settings::SETTINGS_NAME;
use crate::civitai::script::run_script;
use crate::civitai::session::Session;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// The two ways the downloader can be driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeOption {
    QuickDownload,
    InteractiveSession,
    Exit,
}

impl ModeOption {
    fn variants() -> &'static [ModeOption] {
        &[
            ModeOption::QuickDownload,
            ModeOption::InteractiveSession,
            ModeOption::Exit,
        ]
    }

    fn display_name(&self) -> &'static str {
        match self {
            ModeOption::QuickDownload => "Quick download (answer a few prompts)",
            ModeOption::InteractiveSession => "Interactive session (saved settings)",
            ModeOption::Exit => "Exit",
        }
    }
}

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    config: Config,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs the downloader program.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("Civitai downloader");
        trace!("Starting civitai downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        let current_dir_path = current_dir().map_err(|e| {
            error!("Unable to get working directory: {}", e);
            anyhow!("Failed to get working directory: {}", e)
        })?;
        trace!("Program Working Directory: {}", current_dir_path.display());
        trace!("Listing endpoint: {}", self.config.api.base_url);

        if !is_interactive_terminal() {
            println!("Warning: Not running in an interactive terminal.");
            println!("Please run this program from a proper terminal/command prompt.");
            return Ok(());
        }

        let options = ModeOption::variants();
        let names: Vec<&str> = options.iter().map(ModeOption::display_name).collect();
        println!("{}", style(format!("{} v{}", NAME, VERSION)).cyan().bold());
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How would you like to download?")
            .items(&names)
            .default(0)
            .interact()?;

        match options[selection] {
            ModeOption::QuickDownload => run_script(&self.config).await?,
            ModeOption::InteractiveSession => {
                let mut session = Session::new(self.config.clone(), Path::new(SETTINGS_NAME).to_path_buf());
                session.run().await?;
            }
            ModeOption::Exit => {}
        }

        info!("Exiting...");
        Ok(())
    }
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}
