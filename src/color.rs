use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use crate::data::model::TelluricClass;

// ---------------------------------------------------------------------------
// Class colours
// ---------------------------------------------------------------------------

fn hsl_to_color32(hue: f32, saturation: f32, lightness: f32) -> Color32 {
    let rgb: Srgb = Hsl::new(hue, saturation, lightness).into_color();
    Color32::from_rgb(
        (rgb.red * 255.0).round() as u8,
        (rgb.green * 255.0).round() as u8,
        (rgb.blue * 255.0).round() as u8,
    )
}

/// Plot colour of a telluric class: water blue, airmass red, composite purple.
pub fn class_color(class: TelluricClass) -> Color32 {
    let hue = match class {
        TelluricClass::Water => 215.0,
        TelluricClass::Airmass => 0.0,
        TelluricClass::Composite => 280.0,
    };
    hsl_to_color32(hue, 0.75, 0.55)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_get_their_hue() {
        let water = class_color(TelluricClass::Water);
        assert!(water.b() > water.r());

        let airmass = class_color(TelluricClass::Airmass);
        assert!(airmass.r() > airmass.g() && airmass.r() > airmass.b());

        let composite = class_color(TelluricClass::Composite);
        assert!(composite.r() > composite.g() && composite.b() > composite.g());
    }
}
