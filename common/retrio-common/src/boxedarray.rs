//! Heap-allocated fixed-size array wrappers with bincode implementations that
//! deserialize directly into heap memory.
//!
//! The implementation that `#[derive(Decode)]` generates for `Box<[T; LEN]>`
//! decodes into stack memory and then moves the array to the heap, which
//! overflows the stack for the larger memories (SNES WRAM, VRAM, audio RAM).

use bincode::de::read::Reader;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::ops::{Deref, DerefMut};

macro_rules! define_boxed_array {
    ($name:ident, $elem:ty, |$array:ident, $decoder:ident| $decode_body:block) => {
        #[derive(Debug, Clone, Encode)]
        pub struct $name<const LEN: usize>(Box<[$elem; LEN]>);

        impl<const LEN: usize> $name<LEN> {
            #[must_use]
            #[allow(clippy::missing_panics_doc)]
            pub fn new() -> Self {
                Self(vec![<$elem>::default(); LEN].into_boxed_slice().try_into().unwrap())
            }
        }

        impl<const LEN: usize> Default for $name<LEN> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<const LEN: usize> From<Box<[$elem; LEN]>> for $name<LEN> {
            fn from(value: Box<[$elem; LEN]>) -> Self {
                Self(value)
            }
        }

        impl<const LEN: usize> Deref for $name<LEN> {
            type Target = [$elem; LEN];

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl<const LEN: usize> DerefMut for $name<LEN> {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.0
            }
        }

        impl<const LEN: usize, Context> Decode<Context> for $name<LEN> {
            fn decode<D: Decoder<Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, DecodeError> {
                let mut $array = Self::new();
                let $decoder = decoder;
                $decode_body
                Ok($array)
            }
        }

        impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for $name<LEN> {
            fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, DecodeError> {
                let mut $array = Self::new();
                let $decoder = decoder;
                $decode_body
                Ok($array)
            }
        }
    };
}

define_boxed_array!(BoxedByteArray, u8, |array, decoder| {
    decoder.reader().read(array.as_mut_slice())?;
});

define_boxed_array!(BoxedWordArray, u16, |array, decoder| {
    for value in array.iter_mut() {
        *value = u16::decode(decoder)?;
    }
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_array_round_trip() {
        let mut array = BoxedByteArray::<256>::new();
        for (i, value) in array.iter_mut().enumerate() {
            *value = i as u8;
        }

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&array, config).unwrap();
        let (decoded, _): (BoxedByteArray<256>, _) =
            bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(*array, *decoded);
    }

    #[test]
    fn word_array_round_trip() {
        let mut array = BoxedWordArray::<64>::new();
        for (i, value) in array.iter_mut().enumerate() {
            *value = (i as u16) << 8;
        }

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&array, config).unwrap();
        let (decoded, _): (BoxedWordArray<64>, _) =
            bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(*array, *decoded);
    }
}
