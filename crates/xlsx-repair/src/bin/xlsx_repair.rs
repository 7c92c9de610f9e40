fn main() -> anyhow::Result<()> {
    xlsx_repair::cli::run()
}
