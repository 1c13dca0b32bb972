fn main() {
    if let Err(err) = crossload_cli::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
