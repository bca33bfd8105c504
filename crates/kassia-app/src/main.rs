//! `kassia` binary entrypoint.

#[tokio::main]
async fn main() {
    let code = kassia_app::run_app().await;
    std::process::exit(code);
}
