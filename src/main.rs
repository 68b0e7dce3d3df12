fn main() -> anyhow::Result<()> {
    prompt_arena_lib::run()
}
