#![no_main]

use fraiseql_cluster::router::{route_for, Route};
use fraiseql_cluster::DatabaseConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = DatabaseConfig::from_url(s) {
        if config.validate().is_ok() {
            let _ = config.hosts_for("master");
            let _ = config.hosts_for("slave");
        }
    }
    let _ = route_for(s, &Route::Auto);
});
