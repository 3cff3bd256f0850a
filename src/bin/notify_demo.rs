//! Renders a few sample earthquakes and sends them to `WEBHOOK_URL`, or just
//! logs them when no webhook is configured.

use chrono::Utc;
use quake_alert::geo::Classifier;
use quake_alert::notify::discord::DiscordWebhook;
use quake_alert::notify::render::{render_alert, Notification, RenderSettings};
use quake_alert::notify::{LogNotifier, Notifier};
use quake_alert::SeismicEvent;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let notifier: Box<dyn Notifier> = match std::env::var("WEBHOOK_URL")
        .ok()
        .and_then(|u| DiscordWebhook::from_url(&u, reqwest::Client::new()))
    {
        Some(hook) => Box::new(hook),
        None => Box::new(LogNotifier),
    };

    let samples = [
        ("demo-1", 4.7, 13.9, 100.6, "12 km N of Bangkok, Thailand"),
        ("demo-2", 5.8, 21.1, 95.9, "central Myanmar"),
        ("demo-3", 7.1, 38.3, 142.4, "off the east coast of Honshu, Japan"),
    ];

    let classifier = Classifier::default();
    let settings = RenderSettings::default();
    for (id, mag, lat, lng, place) in samples {
        let event = SeismicEvent {
            id: id.into(),
            magnitude: mag,
            place: place.into(),
            occurred_at: Utc::now(),
            longitude: lng,
            latitude: lat,
            depth_km: 10.0,
            details_url: format!("https://earthquake.usgs.gov/earthquakes/eventpage/{id}"),
        };
        let class = classifier.classify(&event);
        let impact = classifier.impact_assessment(mag, &class);
        let msg = render_alert(&Notification { event, class, impact }, &settings);
        if let Err(e) = notifier.send("demo", &msg).await {
            tracing::warn!(error = %e, "demo send failed");
        }
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    }

    println!("notify-demo done");
}
