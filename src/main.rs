use blockpipe_lib::{cli::parse_args, commands};

#[tokio::main]
async fn main() {
    let args = parse_args();
    let code = commands::run(args).await;
    if code != 0 {
        std::process::exit(code);
    }
}
