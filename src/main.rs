fn main() -> anyhow::Result<()> {
    deckfix_lib::run()
}
