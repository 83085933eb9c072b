fn main() {
    pagetrack_lib::run()
}
