fn main() -> anyhow::Result<()> {
    isotile_client::run()
}
