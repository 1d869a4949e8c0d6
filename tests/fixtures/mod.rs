//! Page fixtures for pipeline tests.
//!
//! Cut-down versions of real listing pages, keeping only the markup the
//! extractors read: price elements, room cards, sold-out markers.

/// Ostrovok hotel page with a headline price of 4 900 ₽.
pub const OSTROVOK_PRICED: &str = r#"
    <html><body>
      <h1 class="DesktopHeader_name-3f2a">Grand Hotel</h1>
      <div class="Header_price">
        <p class="Price_priceTitle-9c1d">from 4 900 ₽</p>
      </div>
    </body></html>"#;

/// Ostrovok page for a window with no rooms. The page still renders
/// recommended hotels with their own prices below the marker.
pub const OSTROVOK_SOLD_OUT: &str = r#"
    <html><body>
      <h1>Grand Hotel</h1>
      <div class="Availability_empty">На выбранные даты нет номеров</div>
      <div class="Recommended">
        <p class="Price_priceTitle-77ab">3 100 ₽</p>
      </div>
    </body></html>"#;

/// Avito daily-rental listing: nightly rate 2 500 ₽ next to a deposit and
/// a stay total that must both be ignored.
pub const AVITO_PRICED: &str = r#"
    <html><body>
      <h1>Квартира-студия у моря</h1>
      <li>15 м², 2 кровати</li>
      <span itemprop="price">2 500 ₽</span>
      <span>Залог 10 000 ₽</span>
      <span>Итого 5 000 ₽</span>
    </body></html>"#;

/// Interstitial challenge page served to suspected bots.
pub const CHALLENGE_PAGE: &str = r#"
    <html><body>
      <h1>Подтвердите, что вы не робот</h1>
      <div class="captcha-container"></div>
    </body></html>"#;

/// A page with neither a price nor an availability marker.
pub const UNPARSEABLE: &str = "<html><body><h1>Grand Hotel</h1></body></html>";
