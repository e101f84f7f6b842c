fn main() {
    // Linker arguments only exist when esp-idf-sys was built for the board
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
