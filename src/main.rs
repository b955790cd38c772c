fn main() {
    std::process::exit(chora::run());
}
