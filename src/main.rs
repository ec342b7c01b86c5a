fn main() {
    if let Err(e) = parlor::cli::main() {
        eprintln!("❌ Error: {e}");
        std::process::exit(1);
    }
}
