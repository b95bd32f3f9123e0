fn main() {
    std::process::exit(android_assistant_lib::run());
}
