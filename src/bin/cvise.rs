use anyhow::Result;

fn main() -> Result<()> {
    cvise::cli::run()
}
