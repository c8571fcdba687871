use metrics_exporter_puma::{DogStatsDSink, Environment as _, ProcessEnv, PumaExporterBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let control_url =
        ProcessEnv.var("PUMA_CONTROL_URL").unwrap_or_else(|| "tcp://127.0.0.1:9293".to_string());
    let token = ProcessEnv.var("PUMA_CONTROL_TOKEN");

    let sink = DogStatsDSink::builder()
        .from_env(&ProcessEnv)
        .expect("failed to parse DogStatsD address")
        .build()
        .expect("failed to build DogStatsD sink");

    let handle = PumaExporterBuilder::new()
        .with_control_app(&control_url, token.as_deref())
        .expect("failed to configure control app source")
        .with_sink(sink)
        .install()
        .expect("failed to install Puma exporter");

    // The exporter runs until the process exits.
    handle.join().expect("exporter thread panicked");
}
