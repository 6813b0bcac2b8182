fn main() {
    if let Err(err) = pvoutput_uploader::app::run_service() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
