use anyhow::Result;

use ytbcore::core::{config, init_logger};
use ytbcore::media::Band;
use ytbcore::upload::UploadRequest;

mod app;
mod cli;
mod commands;
mod interactive;

use app::App;
use cli::{Cli, Commands, ConfigAction, CookiesAction};
use commands::EqArgs;

/// Entry point for the `ytb` deck
///
/// Parses CLI arguments and dispatches to the matching subcommand; with no
/// subcommand the interactive queue console starts.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Log panics from worker tasks before the default hook prints them
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    init_logger(&config::LOG_FILE_PATH, cli.verbose)?;

    let app = App::load();

    match cli.command {
        Some(Commands::Download { urls, format }) => {
            log::info!("Queueing {} download(s) with format {}", urls.len(), format);
            commands::run_download(app, urls, format).await
        }
        Some(Commands::Formats { url }) => commands::run_formats(app, url).await,
        Some(Commands::Eq {
            file,
            l1,
            l2,
            l3,
            m1,
            m2,
            m3,
            h1,
            h2,
            h3,
            volume,
        }) => {
            let gains = Band::ALL.into_iter().zip([l1, l2, l3, m1, m2, m3, h1, h2, h3]).collect();
            commands::run_eq(app, EqArgs { file, gains, volume }).await
        }
        Some(Commands::Upload {
            video,
            title,
            cover,
            tags,
            mirror,
        }) => {
            let request = UploadRequest {
                video,
                title,
                cover,
                tags,
            };
            commands::run_upload(app, request, mirror).await
        }
        Some(Commands::Cookies { action }) => match action {
            CookiesAction::Check => commands::run_cookies_check(app).await,
            CookiesAction::Set { path } => commands::run_cookies_set(app, path).await,
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => {
                commands::run_config_show(&app);
                Ok(())
            }
            ConfigAction::SetSavePath { dir } => commands::run_config_set_save_path(app, dir),
        },
        Some(Commands::Setup { force }) => commands::run_setup(app, force).await,
        Some(Commands::Update) => commands::run_update(app).await,
        Some(Commands::Account) => commands::run_account().await,
        Some(Commands::Interactive) | None => interactive::run(app).await,
    }
}
