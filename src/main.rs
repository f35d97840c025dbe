pub fn main() {
    vatslots::run()
}
