fn main() {
    if let Err(err) = sheetdiff::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
