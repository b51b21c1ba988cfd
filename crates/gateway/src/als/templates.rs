//! Per-country ALS template tables. Every field is static so rendering stays
//! deterministic: variant choice is the only degree of freedom and it is
//! fixed by the keyed hash in the builder.

pub(crate) struct AlsTemplate {
    pub(crate) id: &'static str,
    pub(crate) country: &'static str,
    pub(crate) utc_offset: &'static str,
    pub(crate) variants: &'static [AlsVariant],
}

pub(crate) struct AlsVariant {
    pub(crate) id: u32,
    pub(crate) city: &'static str,
    pub(crate) civic_portal: &'static str,
    pub(crate) civic_query: &'static str,
    pub(crate) postal: &'static str,
    pub(crate) phone: &'static str,
    pub(crate) price_sample: &'static str,
}

pub(crate) fn template_for(country: &str) -> Option<&'static AlsTemplate> {
    TEMPLATES.iter().find(|template| template.country == country)
}

static TEMPLATES: &[AlsTemplate] = &[
    AlsTemplate {
        id: "als_us_v1",
        country: "US",
        utc_offset: "UTC-05:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "New York, NY",
                civic_portal: "dmv.ny.gov",
                civic_query: "renew driver license appointment",
                postal: "10018",
                phone: "+1 212 555 0147",
                price_sample: "$12.90",
            },
            AlsVariant {
                id: 1,
                city: "Chicago, IL",
                civic_portal: "ilsos.gov",
                civic_query: "vehicle registration renewal",
                postal: "60601",
                phone: "+1 312 555 0188",
                price_sample: "$8.75",
            },
            AlsVariant {
                id: 2,
                city: "Austin, TX",
                civic_portal: "txdmv.gov",
                civic_query: "replace lost id card",
                postal: "73301",
                phone: "+1 512 555 0102",
                price_sample: "$16.00",
            },
        ],
    },
    AlsTemplate {
        id: "als_gb_v1",
        country: "GB",
        utc_offset: "UTC+01:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "London",
                civic_portal: "gov.uk",
                civic_query: "renew driving licence online",
                postal: "SW1A 1AA",
                phone: "+44 20 7946 0958",
                price_sample: "£14.50",
            },
            AlsVariant {
                id: 1,
                city: "Manchester",
                civic_portal: "gov.uk",
                civic_query: "council tax band lookup",
                postal: "M1 1AE",
                phone: "+44 161 496 0735",
                price_sample: "£9.20",
            },
        ],
    },
    AlsTemplate {
        id: "als_de_v1",
        country: "DE",
        utc_offset: "UTC+02:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Berlin",
                civic_portal: "bund.de",
                civic_query: "Führerschein verlängern Termin",
                postal: "10115",
                phone: "+49 30 2094 0000",
                price_sample: "12,90 €",
            },
            AlsVariant {
                id: 1,
                city: "München",
                civic_portal: "muenchen.de",
                civic_query: "Anmeldung Wohnsitz Termin",
                postal: "80331",
                phone: "+49 89 2330 0000",
                price_sample: "7,50 €",
            },
        ],
    },
    AlsTemplate {
        id: "als_fr_v1",
        country: "FR",
        utc_offset: "UTC+02:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Paris",
                civic_portal: "service-public.fr",
                civic_query: "renouveler carte d'identité rendez-vous",
                postal: "75001",
                phone: "+33 1 42 76 40 40",
                price_sample: "12,90 €",
            },
            AlsVariant {
                id: 1,
                city: "Lyon",
                civic_portal: "service-public.fr",
                civic_query: "carte grise changement adresse",
                postal: "69001",
                phone: "+33 4 72 10 30 30",
                price_sample: "6,40 €",
            },
        ],
    },
    AlsTemplate {
        id: "als_it_v1",
        country: "IT",
        utc_offset: "UTC+02:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Roma",
                civic_portal: "anagrafenazionale.interno.it",
                civic_query: "rinnovo carta identità appuntamento",
                postal: "00184",
                phone: "+39 06 0606",
                price_sample: "16,79 €",
            },
            AlsVariant {
                id: 1,
                city: "Milano",
                civic_portal: "comune.milano.it",
                civic_query: "certificato residenza online",
                postal: "20121",
                phone: "+39 02 0202",
                price_sample: "5,20 €",
            },
        ],
    },
    AlsTemplate {
        id: "als_ch_v1",
        country: "CH",
        utc_offset: "UTC+02:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Zürich",
                civic_portal: "ch.ch",
                civic_query: "Führerausweis umtauschen Termin",
                postal: "8001",
                phone: "+41 44 411 11 11",
                price_sample: "CHF 24.50",
            },
            AlsVariant {
                id: 1,
                city: "Genève",
                civic_portal: "ge.ch",
                civic_query: "permis de conduire échange",
                postal: "1201",
                phone: "+41 22 327 27 27",
                price_sample: "CHF 18.00",
            },
        ],
    },
    AlsTemplate {
        id: "als_ae_v1",
        country: "AE",
        utc_offset: "UTC+04:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Dubai",
                civic_portal: "u.ae",
                civic_query: "emirates id renewal appointment",
                postal: "00000",
                phone: "+971 4 406 5555",
                price_sample: "AED 52.00",
            },
            AlsVariant {
                id: 1,
                city: "Abu Dhabi",
                civic_portal: "tamm.abudhabi",
                civic_query: "vehicle registration renewal",
                postal: "00000",
                phone: "+971 2 666 4442",
                price_sample: "AED 35.00",
            },
        ],
    },
    AlsTemplate {
        id: "als_sg_v1",
        country: "SG",
        utc_offset: "UTC+08:00",
        variants: &[
            AlsVariant {
                id: 0,
                city: "Singapore",
                civic_portal: "ica.gov.sg",
                civic_query: "renew passport appointment",
                postal: "018956",
                phone: "+65 6391 6100",
                price_sample: "S$70.00",
            },
            AlsVariant {
                id: 1,
                city: "Singapore",
                civic_portal: "onemotoring.lta.gov.sg",
                civic_query: "road tax renewal",
                postal: "408865",
                phone: "+65 6225 5582",
                price_sample: "S$12.50",
            },
        ],
    },
];
