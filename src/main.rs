fn main() {
    if let Err(err) = pvoutput_uploader::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
