//! Seed data for the shared location pool: district centres of Nepal.
//!
//! The pool is read-only at runtime. Ids are assigned by position (1-based), so a
//! store seeded twice from this table ends up with the same entries.

use crate::core_modules::route_assigner::LocationPoolEntry;

const NEPAL_DISTRICTS: &[(&str, f64, f64)] = &[
    ("Bhojpur", 27.1667, 87.0500),
    ("Dhankuta", 26.9833, 87.3333),
    ("Ilam", 26.9089, 87.9286),
    ("Jhapa", 26.3467, 87.8167),
    ("Khotang", 27.0333, 86.8167),
    ("Morang", 26.6500, 87.2833),
    ("Okhaldhunga", 27.3167, 86.5000),
    ("Panchthar", 27.1333, 87.8667),
    ("Sankhuwasabha", 27.4333, 87.1833),
    ("Solukhumbu", 27.6833, 86.7333),
    ("Sunsari", 26.6167, 87.1833),
    ("Taplejung", 27.3500, 87.6667),
    ("Terhathum", 27.1167, 87.5667),
    ("Udayapur", 26.8500, 86.7333),
    ("Bara", 27.0000, 84.9333),
    ("Dhanusha", 26.7500, 85.9667),
    ("Mahottari", 26.8667, 85.7500),
    ("Parsa", 27.0500, 84.9167),
    ("Rautahat", 27.0000, 85.2833),
    ("Saptari", 26.7333, 86.7167),
    ("Sarlahi", 26.9833, 85.5500),
    ("Siraha", 26.6500, 86.2000),
    ("Bhaktapur", 27.6710, 85.4298),
    ("Chitwan", 27.5291, 84.3542),
    ("Dhading", 27.8667, 84.9000),
    ("Dolakha", 27.6833, 86.1667),
    ("Kathmandu", 27.7172, 85.3240),
    ("Kavrepalanchok", 27.5500, 85.5667),
    ("Lalitpur", 27.6667, 85.3167),
    ("Makwanpur", 27.4333, 85.0333),
    ("Nuwakot", 27.9167, 85.1667),
    ("Ramechhap", 27.3333, 86.0833),
    ("Rasuwa", 28.1667, 85.3333),
    ("Sindhuli", 27.2500, 85.9667),
    ("Sindhupalchok", 27.9500, 85.6833),
    ("Baglung", 28.2667, 83.5833),
    ("Gorkha", 28.0000, 84.6333),
    ("Kaski", 28.2096, 83.9856),
    ("Lamjung", 28.2333, 84.3833),
    ("Manang", 28.6667, 84.0167),
    ("Mustang", 28.9833, 83.8833),
    ("Myagdi", 28.6000, 83.3667),
    ("Nawalpur", 27.7167, 84.1167),
    ("Parbat", 28.2167, 83.6833),
    ("Syangja", 28.0833, 83.8667),
    ("Tanahun", 27.9167, 84.2333),
    ("Arghakhanchi", 28.0000, 83.1000),
    ("Banke", 28.0500, 81.6167),
    ("Bardiya", 28.3333, 81.3500),
    ("Dang", 28.0833, 82.3000),
    ("Gulmi", 28.0833, 83.2833),
    ("Kapilvastu", 27.5667, 83.0500),
    ("Nawalparasi East", 27.6333, 84.0833),
    ("Nawalparasi West", 27.6333, 83.4500),
    ("Palpa", 27.8667, 83.5500),
    ("Pyuthan", 28.0833, 82.8333),
    ("Rolpa", 28.2667, 82.6333),
    ("Rupandehi", 27.5000, 83.4667),
    ("Dailekh", 28.8500, 81.7167),
    ("Dolpa", 28.9833, 82.8167),
    ("Humla", 29.6667, 81.8333),
    ("Jajarkot", 28.7000, 82.1833),
    ("Jumla", 29.2744, 82.1833),
    ("Kalikot", 29.1333, 81.7333),
    ("Mugu", 29.6667, 82.1667),
    ("Salyan", 28.3667, 82.1667),
    ("Surkhet", 28.6000, 81.6333),
    ("Western Rukum", 28.5833, 82.5667),
    ("Achham", 29.0833, 81.2333),
    ("Baitadi", 29.5333, 80.5500),
    ("Bajhang", 29.5333, 81.1833),
    ("Bajura", 29.5000, 81.6667),
    ("Dadeldhura", 29.3000, 80.5833),
    ("Darchula", 29.8500, 80.5500),
    ("Doti", 29.2667, 80.9833),
    ("Kailali", 28.7500, 80.9167),
    ("Kanchanpur", 28.8333, 80.2500),
];

/// The district table as pool entries, in seed order.
pub fn nepal_districts() -> Vec<LocationPoolEntry> {
    NEPAL_DISTRICTS
        .iter()
        .zip(1u32..)
        .map(|(&(name, latitude, longitude), id)| LocationPoolEntry {
            id,
            name: name.to_string(),
            latitude,
            longitude,
        })
        .collect()
}

/// Same entries sorted by name, the order pool listings are returned in.
pub fn sorted_by_name(mut pool: Vec<LocationPoolEntry>) -> Vec<LocationPoolEntry> {
    pool.sort_by(|a, b| a.name.cmp(&b.name));
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seed_names_and_ids_are_unique() {
        let pool = nepal_districts();
        assert_eq!(pool.len(), NEPAL_DISTRICTS.len());
        let names: HashSet<_> = pool.iter().map(|entry| entry.name.as_str()).collect();
        let ids: HashSet<_> = pool.iter().map(|entry| entry.id).collect();
        assert_eq!(names.len(), pool.len());
        assert_eq!(ids.len(), pool.len());
        assert!(names.contains("Kathmandu"));
    }

    #[test]
    fn coordinates_stay_inside_nepal() {
        for entry in nepal_districts() {
            assert!((26.0..31.0).contains(&entry.latitude), "{}", entry.name);
            assert!((80.0..89.0).contains(&entry.longitude), "{}", entry.name);
        }
    }

    #[test]
    fn listing_order_is_alphabetical() {
        let sorted = sorted_by_name(nepal_districts());
        assert_eq!(sorted[0].name, "Achham");
        assert!(sorted.windows(2).all(|pair| pair[0].name <= pair[1].name));
    }
}
