fn main() -> anyhow::Result<()> {
    filelist_sync::cli::run()
}
