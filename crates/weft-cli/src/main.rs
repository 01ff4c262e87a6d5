fn main() -> Result<(), Box<dyn std::error::Error>> {
    weft_cli::runner::main(std::env::args().collect())
}
