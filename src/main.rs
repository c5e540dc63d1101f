fn main() {
    std::process::exit(streamload::app::startup::startup());
}
