use anyhow::Result;

fn main() -> Result<()> {
    jailcall::cli::run()
}
