use pgexporter::app;
use pgexporter::config;

fn main() {
    let args = app::args::parse();

    if args.test_config {
        match config::build(&args.config_file) {
            Ok(_) => {
                println!("Configuration file {} is valid", args.config_file);
                return;
            }
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }

    app::logger::init_logging(&args);

    if let Err(err) = config::parse(&args.config_file) {
        log::error!("{err}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("Failed to build the runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(app::run()) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
