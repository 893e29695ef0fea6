fn main() {
    telebridge_lib::run()
}
