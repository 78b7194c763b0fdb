//! Configuration view: `pontual config show`.

use anyhow::Result;
use pontual::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!("{}", config.to_display_toml()?);
            let problems = config.validate();
            if problems.is_empty() {
                println!("# configuration is valid");
            } else {
                for problem in problems {
                    println!("# warning: {}", problem);
                }
            }
        }
    }
    Ok(())
}
