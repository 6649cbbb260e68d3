use proptest::prelude::*;
use shellcn_crypto::prelude::*;

proptest! {
    #[test]
    fn roundtrip_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let key = MasterKey::from_bytes([11u8; 32]);
        let sealer = Sealer::<ChaCha>::new(&key).unwrap();

        let sealed = sealer.seal(&data, b"ctx").unwrap();
        let opened = sealer.open(&sealed, b"ctx").unwrap();
        prop_assert_eq!(&data, &*opened);

        let sealer_aes = Sealer::<Aes>::new(&key).unwrap();
        let sealed_aes = sealer_aes.seal(&data, b"ctx").unwrap();
        let opened_aes = sealer_aes.open(&sealed_aes, b"ctx").unwrap();
        prop_assert_eq!(data, opened_aes.to_vec());
    }

    #[test]
    fn wrong_aad_never_opens(data in proptest::collection::vec(any::<u8>(), 1..256)) {
        let key = MasterKey::from_bytes([12u8; 32]);
        let sealer = Sealer::<ChaCha>::new(&key).unwrap();

        let sealed = sealer.seal(&data, b"aad-one").unwrap();
        prop_assert!(sealer.open(&sealed, b"aad-two").is_err());
    }
}
