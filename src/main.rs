fn main() {
    gto_trees::cli::run();
}
