// Extraction of availability counts from the reservation page markup
// Every open slot is rendered as an element whose class list carries `li-possible ... possible`

use regex::Regex;
use std::sync::LazyLock;

static POSSIBLE_SLOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="[^"]*li-possible[^"]*possible[^"]*""#)
        .expect("slot marker pattern is valid")
});

// A body without any marker is a fully booked date, not a failure
pub fn count_available_slots(body: &[u8]) -> usize {
    let text = String::from_utf8_lossy(body);
    POSSIBLE_SLOT.find_iter(&text).count()
}
