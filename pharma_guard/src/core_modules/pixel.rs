// THEORY:
// The `Pixel` module is the most fundamental unit of the sticker classifier. It is a
// "dumb" data container for a single RGB sample plus the one heuristic the rest of
// the engine needs from a lone pixel: its position in HSV space.
//
// Key principles:
// 1) Single-pixel scope: nothing here reads neighbors, clusters or history. Cluster
//    logic lives in `cluster`, band logic in `sticker_classifier`.
// 2) HSV on the percentage scale: hue is an angle in [0, 360), saturation and value
//    are 0..100. The classifier's low-signal floor and hue bands are expressed on
//    exactly these scales, so no caller has to rescale.
// 3) Total: every byte triple has a defined HSV. Achromatic input (all channels
//    equal) has hue 0 and saturation 0; pure black has value 0.

pub mod pixel {
    use serde::{Deserialize, Serialize};

    pub type Byte = u8;
    pub type Channel = Byte;
    pub type NormalizedChannel = f32;
    pub type Hue = f32;
    pub type Saturation = f32;
    pub type Value = f32;

    const RGB_CHANNELS: usize = 3;
    const RGBA_CHANNELS: usize = 4;

    /// A "dumb" data container representing a single RGB sample taken from a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
    }

    /// A color expressed as hue (degrees), saturation (percent) and value (percent).
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Hsv {
        /// Angle on the color wheel, always in [0, 360).
        pub hue: Hue,
        /// Distance from gray relative to brightness, 0..100.
        pub saturation: Saturation,
        /// Brightness defined as the maximum channel, 0..100.
        pub value: Value,
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        /// Neutral mid-gray, reported when no sticker color could be isolated.
        pub const fn neutral_gray() -> Self {
            Pixel::new(128, 128, 128)
        }

        /// HSV representation of this sample.
        pub fn hsv(&self) -> Hsv {
            rgb_to_hsv(self.red, self.green, self.blue)
        }

        /// Squared Euclidean distance in RGB space. The square root is skipped since
        /// callers only compare distances against each other.
        pub fn distance_squared(&self, other: &Pixel) -> u32 {
            let dr = self.red as i32 - other.red as i32;
            let dg = self.green as i32 - other.green as i32;
            let db = self.blue as i32 - other.blue as i32;
            (dr * dr + dg * dg + db * db) as u32
        }
    }

    /// Converts an 8-bit RGB triple into hue [0, 360), saturation 0..100 and value 0..100.
    ///
    /// Standard max/min channel formula on normalized sRGB, no linearization. The
    /// sticker hue bands were tuned against gamma-encoded camera output.
    pub fn rgb_to_hsv(red: Channel, green: Channel, blue: Channel) -> Hsv {
        let red_normalized = red as NormalizedChannel / 255.0;
        let green_normalized = green as NormalizedChannel / 255.0;
        let blue_normalized = blue as NormalizedChannel / 255.0;

        let maximum_channel = red_normalized.max(green_normalized.max(blue_normalized));
        let minimum_channel = red_normalized.min(green_normalized.min(blue_normalized));
        let chroma = maximum_channel - minimum_channel;

        let saturation = if maximum_channel <= 1e-6 {
            0.0
        } else {
            chroma / maximum_channel * 100.0
        };
        let value = maximum_channel * 100.0;

        if red == green && green == blue {
            return Hsv { hue: 0.0, saturation: 0.0, value };
        }

        let inverse_chroma = 1.0 / chroma;
        let (base_difference, sector_offset) = if red >= green && red >= blue {
            (green_normalized - blue_normalized, 0.0)
        } else if green >= blue {
            (blue_normalized - red_normalized, 2.0)
        } else {
            (red_normalized - green_normalized, 4.0)
        };

        let mut hue_degrees = (base_difference * inverse_chroma + sector_offset) * 60.0;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }
        // A tiny negative angle plus 360 can round up to exactly 360 in f32.
        if hue_degrees >= 360.0 {
            hue_degrees -= 360.0;
        }

        Hsv {
            hue: hue_degrees,
            saturation: saturation.clamp(0.0, 100.0),
            value: value.clamp(0.0, 100.0),
        }
    }

    /// Accepts RGB or RGBA byte groups; alpha is dropped.
    impl TryFrom<&[Byte]> for Pixel {
        type Error = usize;

        fn try_from(bytes: &[Byte]) -> Result<Self, Self::Error> {
            match bytes.len() {
                RGB_CHANNELS | RGBA_CHANNELS => Ok(Pixel::new(bytes[0], bytes[1], bytes[2])),
                other => Err(other),
            }
        }
    }

    impl From<(Byte, Byte, Byte)> for Pixel {
        fn from((red, green, blue): (Byte, Byte, Byte)) -> Self {
            Pixel::new(red, green, blue)
        }
    }

    impl From<image::Rgba<u8>> for Pixel {
        fn from(rgba: image::Rgba<u8>) -> Self {
            Pixel::new(rgba.0[0], rgba.0[1], rgba.0[2])
        }
    }

}
